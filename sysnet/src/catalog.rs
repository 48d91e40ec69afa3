use std::collections::HashSet;

use machine_learning::dataset::Dataset;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{Result, SysnetErr, scaling::Scaler};

/// One spatial unit of the survey footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// The unique spatial identifier, e.g. a pixel index.
    pub id: u64,
    /// The value of every template at this unit.
    pub features: Vec<f32>,
    /// The observed galaxy count.
    pub count: f32,
    /// The fraction of the unit actually observed. An unobserved unit has weight 0, it still
    /// gets a systematic weight but doesn't count in any loss.
    pub weight: f32,
}

/// The full, immutable set of samples the pipeline works with.
///
/// Every sample is validated on construction, so the rest of the crate can rely on a fixed
/// feature schema, non-negative counts and non-negative weights.
#[derive(Debug, Clone)]
pub struct Catalog {
    samples: Vec<Sample>,
    x_size: usize,
    nbar: f32,
}

impl Catalog {
    /// Creates a new `Catalog`.
    ///
    /// # Returns
    /// A configuration error if the catalog is empty, the feature vectors don't share their
    /// size, an identifier repeats or a value is out of range.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(SysnetErr::config("the catalog has no samples"));
        };

        let x_size = first.features.len();
        if x_size == 0 {
            return Err(SysnetErr::config("samples need at least one template"));
        }

        let mut ids = HashSet::with_capacity(samples.len());

        for sample in &samples {
            let id = sample.id;

            if !ids.insert(id) {
                return Err(SysnetErr::config(format!("sample id {id} is repeated")));
            }

            if sample.features.len() != x_size {
                return Err(SysnetErr::config(format!(
                    "sample {id} has {} templates, expected {x_size}",
                    sample.features.len()
                )));
            }

            if sample.features.iter().any(|f| !f.is_finite()) {
                return Err(SysnetErr::config(format!("sample {id} has non-finite templates")));
            }

            if !(sample.count >= 0.0 && sample.count.is_finite()) {
                return Err(SysnetErr::config(format!(
                    "sample {id} has an invalid count {}",
                    sample.count
                )));
            }

            if !(sample.weight >= 0.0 && sample.weight.is_finite()) {
                return Err(SysnetErr::config(format!(
                    "sample {id} has an invalid weight {}",
                    sample.weight
                )));
            }
        }

        let total_count: f64 = samples.iter().map(|s| s.count as f64).sum();
        let total_weight: f64 = samples.iter().map(|s| s.weight as f64).sum();
        let nbar = (total_count / total_weight) as f32;

        if total_weight <= 0.0 {
            return Err(SysnetErr::config("every sample of the catalog has weight 0"));
        }

        if !(nbar > 0.0) {
            return Err(SysnetErr::config("the catalog has no galaxies"));
        }

        Ok(Self {
            samples,
            x_size,
            nbar,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the amount of templates per sample.
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn ids(&self) -> Vec<u64> {
        self.samples.iter().map(|s| s.id).collect()
    }

    /// Returns the mean galaxy density of the footprint, counts per unit of weight.
    pub fn nbar(&self) -> f32 {
        self.nbar
    }

    /// Returns the density of sample `i` relative to the footprint's mean, the regression
    /// target. Unobserved samples have target 0.
    pub fn target(&self, i: usize) -> f32 {
        let sample = &self.samples[i];

        if sample.weight == 0.0 {
            return 0.0;
        }

        sample.count / (sample.weight * self.nbar)
    }

    /// Gathers the raw templates of the given samples, one row each.
    pub fn features(&self, idx: &[usize]) -> Array2<f32> {
        Array2::from_shape_fn((idx.len(), self.x_size), |(r, c)| {
            self.samples[idx[r]].features[c]
        })
    }

    /// Builds the design matrix of the given samples with their templates rescaled by `scaler`.
    pub fn dataset(&self, idx: &[usize], scaler: &Scaler) -> machine_learning::Result<Dataset> {
        let x = scaler.transform(self.features(idx).view());
        let y = idx.iter().map(|&i| self.target(i)).collect();
        let w = idx.iter().map(|&i| self.samples[i].weight).collect();

        Dataset::new(x, y, w)
    }
}
