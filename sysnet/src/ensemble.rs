use std::collections::HashMap;

use log::info;
use machine_learning::MlErr;
use serde::{Deserialize, Serialize};

use crate::{Result, SysnetErr, pipeline::PredictionRecord};

/// How the ensembled response of a sample becomes its systematic weight.
///
/// Both conventions normalize the weights to a mean of exactly 1 over the footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightConvention {
    /// `weight_i = (1 / r_i) / mean_j(1 / r_j)`. Dividing the observed density by the
    /// response is the same as multiplying it by this weight. Needs positive responses.
    #[default]
    Inverse,
    /// `weight_i = 1 - (r_i - mean_j(r_j))`, the first order expansion of the inverse for
    /// responses close to their mean.
    Additive,
}

/// The systematic weight of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicWeight {
    pub id: u64,
    pub weight: f32,
    /// The spread of the weight among the runs that predicted this sample.
    pub uncertainty: f32,
    /// The mean predicted response.
    pub response: f32,
    pub num_predictions: usize,
}

/// The final weight map, in the same order as the footprint given to `Ensembler::combine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMap {
    pub convention: WeightConvention,
    pub weights: Vec<SystematicWeight>,
}

impl WeightMap {
    pub fn mean_weight(&self) -> f32 {
        mean(self.weights.iter().map(|w| w.weight as f64)) as f32
    }

    /// Returns the mean uncertainty, a summary of how much the runs disagree.
    pub fn mean_uncertainty(&self) -> f32 {
        mean(self.weights.iter().map(|w| w.uncertainty as f64)) as f32
    }
}

/// Combines the test predictions of every run into one weight per sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ensembler {
    convention: WeightConvention,
}

impl Ensembler {
    pub fn new(convention: WeightConvention) -> Self {
        Self { convention }
    }

    /// Averages the predictions of every sample and turns them into weights.
    ///
    /// # Arguments
    /// * `ids` - The identifiers of the full footprint, every one of them needs predictions.
    /// * `records` - The predictions of every successful run.
    ///
    /// # Returns
    /// The weight map, a `MissingCoverage` error if a sample has no predictions or a domain
    /// error if the inverse convention meets a non-positive response.
    pub fn combine(&self, ids: &[u64], records: &[PredictionRecord]) -> Result<WeightMap> {
        let index: HashMap<u64, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let mut predictions = vec![Vec::new(); ids.len()];

        for record in records {
            let Some(&i) = index.get(&record.id) else {
                return Err(SysnetErr::config(format!(
                    "prediction for unknown sample {}",
                    record.id
                )));
            };

            predictions[i].push(record.prediction as f64);
        }

        let missing: Vec<u64> = ids
            .iter()
            .zip(&predictions)
            .filter(|(_, p)| p.is_empty())
            .map(|(&id, _)| id)
            .collect();

        if !missing.is_empty() {
            return Err(SysnetErr::MissingCoverage { ids: missing });
        }

        let stats: Vec<(f64, f64)> = predictions.iter().map(|p| mean_and_std(p)).collect();

        let weights = match self.convention {
            WeightConvention::Inverse => inverse(&stats)?,
            WeightConvention::Additive => additive(&stats),
        };

        let weights: Vec<SystematicWeight> = ids
            .iter()
            .zip(&predictions)
            .zip(&stats)
            .zip(weights)
            .map(|(((&id, p), &(response, _)), (weight, uncertainty))| SystematicWeight {
                id,
                weight: weight as f32,
                uncertainty: uncertainty as f32,
                response: response as f32,
                num_predictions: p.len(),
            })
            .collect();

        let map = WeightMap {
            convention: self.convention,
            weights,
        };

        info!(
            samples = map.weights.len(),
            mean_weight = map.mean_weight(),
            mean_uncertainty = map.mean_uncertainty();
            "ensembled {} predictions",
            records.len()
        );

        Ok(map)
    }
}

fn inverse(stats: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
    if let Some(i) = stats.iter().position(|&(r, _)| !(r > 0.0)) {
        return Err(SysnetErr::Ml(MlErr::Domain {
            what: "ensembled response",
            index: i,
            value: stats[i].0 as f32,
        }));
    }

    let norm = mean(stats.iter().map(|&(r, _)| 1.0 / r));

    // d(1 / r) = dr / r^2, rescaled like the weight.
    Ok(stats
        .iter()
        .map(|&(r, spread)| {
            let weight = 1.0 / (r * norm);
            (weight, weight * spread / r)
        })
        .collect())
}

fn additive(stats: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let shift = mean(stats.iter().map(|&(r, _)| r));

    stats
        .iter()
        .map(|&(r, spread)| (1.0 - (r - shift), spread))
        .collect()
}

fn mean<I: ExactSizeIterator<Item = f64>>(values: I) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }

    values.sum::<f64>() / n as f64
}

/// Returns the mean and the sample standard deviation, which is 0 for a single value.
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    let mean = mean(values.iter().copied());

    if n < 2 {
        return (mean, 0.0);
    }

    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, prediction: f32, seed: u64) -> PredictionRecord {
        PredictionRecord {
            id,
            prediction,
            partition: (id % 3) as usize,
            seed,
        }
    }

    #[test]
    fn constant_predictions_have_unit_mean_weight() {
        let ids: Vec<u64> = (0..50).collect();
        let records: Vec<_> = ids.iter().map(|&id| record(id, 1.7, 0)).collect();

        for convention in [WeightConvention::Inverse, WeightConvention::Additive] {
            let map = Ensembler::new(convention).combine(&ids, &records).unwrap();

            assert!((map.mean_weight() - 1.0).abs() < 1e-6);
            assert!(map.weights.iter().all(|w| (w.weight - 1.0).abs() < 1e-6));
            assert!(map.weights.iter().all(|w| w.uncertainty == 0.0));
        }
    }

    #[test]
    fn weights_undo_the_response() {
        let ids = [10, 20];
        let records = [record(10, 0.5, 0), record(20, 2.0, 0)];

        let map = Ensembler::new(WeightConvention::Inverse)
            .combine(&ids, &records)
            .unwrap();

        // 1 / r = [2, 0.5], normalized by their mean 1.25.
        assert!((map.weights[0].weight - 1.6).abs() < 1e-6);
        assert!((map.weights[1].weight - 0.4).abs() < 1e-6);
        assert!((map.mean_weight() - 1.0).abs() < 1e-6);

        let map = Ensembler::new(WeightConvention::Additive)
            .combine(&ids, &records)
            .unwrap();

        assert!((map.weights[0].weight - 1.75).abs() < 1e-6);
        assert!((map.weights[1].weight - 0.25).abs() < 1e-6);
    }

    #[test]
    fn seeds_are_averaged_and_their_spread_reported() {
        let ids = [1, 2];
        let records = [
            record(1, 0.9, 0),
            record(1, 1.1, 1),
            record(2, 1.0, 0),
            record(2, 1.0, 1),
        ];

        let map = Ensembler::new(WeightConvention::Additive)
            .combine(&ids, &records)
            .unwrap();

        assert!((map.weights[0].response - 1.0).abs() < 1e-6);
        assert_eq!(map.weights[0].num_predictions, 2);
        assert!((map.weights[0].uncertainty - 0.02f32.sqrt()).abs() < 1e-6);
        assert_eq!(map.weights[1].uncertainty, 0.0);
    }

    #[test]
    fn uncovered_samples_are_reported() {
        let ids = [1, 2, 3];
        let records = [record(2, 1.0, 0)];

        match Ensembler::default().combine(&ids, &records) {
            Err(SysnetErr::MissingCoverage { ids }) => assert_eq!(ids, vec![1, 3]),
            other => panic!("expected missing coverage, got {other:?}"),
        }
    }

    #[test]
    fn inverse_needs_positive_responses() {
        let ids = [1, 2];
        let records = [record(1, 1.0, 0), record(2, -0.5, 0)];

        assert!(matches!(
            Ensembler::new(WeightConvention::Inverse).combine(&ids, &records),
            Err(SysnetErr::Ml(MlErr::Domain { index: 1, .. }))
        ));
        assert!(Ensembler::new(WeightConvention::Additive)
            .combine(&ids, &records)
            .is_ok());
    }
}
