use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Columns whose spread is below this keep a unit scale.
const MIN_SCALE: f32 = 1e-12;

/// How the templates are rescaled before reaching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureScaling {
    /// Zero mean and unit variance.
    #[default]
    ZScore,
    /// Maps every column onto `[0, 1]`.
    MinMax,
    None,
}

/// A per-column affine transform, fitted on one set of samples and applied to others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    shift: Vec<f32>,
    scale: Vec<f32>,
}

impl Scaler {
    /// Fits the transform on `x`.
    ///
    /// # Arguments
    /// * `kind` - The kind of scaling.
    /// * `x` - The samples to take the statistics from, usually the training fold.
    pub fn fit(kind: FeatureScaling, x: ArrayView2<f32>) -> Self {
        let cols = x.ncols();

        let (shift, scale) = match kind {
            FeatureScaling::None => (vec![0.0; cols], vec![1.0; cols]),
            FeatureScaling::ZScore => {
                let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(cols));
                let std = x.std_axis(Axis(0), 0.0);
                (mean.to_vec(), std.iter().map(|&s| unit_if_flat(s)).collect())
            }
            FeatureScaling::MinMax => x
                .axis_iter(Axis(1))
                .map(|col| {
                    let min = col.iter().copied().fold(f32::INFINITY, f32::min);
                    let max = col.iter().copied().fold(f32::NEG_INFINITY, f32::max);

                    if min.is_finite() && max.is_finite() {
                        (min, unit_if_flat(max - min))
                    } else {
                        (0.0, 1.0)
                    }
                })
                .unzip(),
        };

        Self { shift, scale }
    }

    /// Keeps the transform of the given columns only, in the given order. Columns that don't
    /// exist are skipped.
    pub fn select(&self, columns: &[usize]) -> Self {
        let (shift, scale) = columns
            .iter()
            .filter_map(|&col| Some((*self.shift.get(col)?, *self.scale.get(col)?)))
            .unzip();

        Self { shift, scale }
    }

    /// Applies the transform to `x`.
    pub fn transform(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let shift = Array1::from(self.shift.clone());
        let scale = Array1::from(self.scale.clone());

        (&x - &shift) / &scale
    }
}

fn unit_if_flat(spread: f32) -> f32 {
    if spread > MIN_SCALE { spread } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn z_score_standardizes_the_fitted_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]];
        let scaler = Scaler::fit(FeatureScaling::ZScore, x.view());
        let z = scaler.transform(x.view());

        let mean = z.mean_axis(Axis(0)).unwrap();
        let std = z.std_axis(Axis(0), 0.0);

        assert!(mean.iter().all(|m| m.abs() < 1e-6));
        assert!((std[0] - 1.0).abs() < 1e-6);
        // Constant columns are only centered.
        assert_eq!(z.column(1).to_vec(), vec![0.0; 3]);
    }

    #[test]
    fn min_max_maps_onto_the_unit_interval() {
        let train = array![[2.0], [4.0], [6.0]];
        let scaler = Scaler::fit(FeatureScaling::MinMax, train.view());

        let other = array![[3.0], [8.0]];
        assert_eq!(scaler.transform(other.view()), array![[0.25], [1.5]]);
    }

    #[test]
    fn none_is_the_identity() {
        let x = array![[2.0, -1.0]];
        let scaler = Scaler::fit(FeatureScaling::None, x.view());
        assert_eq!(scaler.transform(x.view()), x);
    }

    #[test]
    fn selected_columns_keep_their_statistics() {
        let x = array![[1.0, 10.0, 0.0], [3.0, 30.0, 1.0]];
        let scaler = Scaler::fit(FeatureScaling::MinMax, x.view());

        let narrow = scaler.select(&[1]);
        assert_eq!(narrow.transform(array![[20.0]].view()), array![[0.5]]);
    }
}
