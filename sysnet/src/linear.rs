use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{Result, SysnetErr};

/// Added to the diagonal of the normal equations so constant or collinear templates still give
/// a unique solution.
const RIDGE: f64 = 1e-6;

/// A linear model with an intercept, fitted by cost weighted least squares.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegression {
    intercept: f32,
    coef: Vec<f32>,
}

impl LinearRegression {
    /// Fits `y = intercept + x · coef` minimizing `sum(w * (y_pred - y)^2)`.
    ///
    /// # Arguments
    /// * `x` - The templates, one row per sample.
    /// * `y` - The targets.
    /// * `w` - The cost weights, samples with weight 0 are ignored.
    ///
    /// # Returns
    /// The fitted model or a configuration error if the samples can't determine it.
    pub fn fit(x: ArrayView2<f32>, y: ArrayView1<f32>, w: ArrayView1<f32>) -> Result<Self> {
        let (n, d) = x.dim();

        if y.len() != n || w.len() != n {
            return Err(SysnetErr::config(format!(
                "linear fit got {n} rows, {} targets and {} weights",
                y.len(),
                w.len()
            )));
        }

        // The normal equations over [1, x].
        let p = d + 1;
        let mut a = Array2::<f64>::zeros((p, p));
        let mut b = Array1::<f64>::zeros(p);
        let mut z = Array1::<f64>::zeros(p);

        for ((row, &t), &wi) in x.axis_iter(Axis(0)).zip(y).zip(w) {
            if wi == 0.0 {
                continue;
            }

            z[0] = 1.0;
            z.slice_mut(ndarray::s![1..])
                .assign(&row.mapv(|v| v as f64));

            let wi = wi as f64;
            for i in 0..p {
                b[i] += wi * t as f64 * z[i];
                for j in 0..=i {
                    a[[i, j]] += wi * z[i] * z[j];
                }
            }
        }

        for i in 1..p {
            a[[i, i]] += RIDGE;
        }

        let solution = cholesky_solve(a, b)
            .ok_or_else(|| SysnetErr::config("the linear model has no weighted samples to fit"))?;

        Ok(Self {
            intercept: solution[0] as f32,
            coef: solution.iter().skip(1).map(|&c| c as f32).collect(),
        })
    }

    pub fn intercept(&self) -> f32 {
        self.intercept
    }

    pub fn coef(&self) -> &[f32] {
        &self.coef
    }

    pub fn predict(&self, x: ArrayView2<f32>) -> Array1<f32> {
        x.dot(&ArrayView1::from(&self.coef[..])) + self.intercept
    }

    /// Returns the weighted squared error averaged over every sample, the same measure the
    /// network is trained with under the `mse` cost.
    pub fn loss(&self, x: ArrayView2<f32>, y: ArrayView1<f32>, w: ArrayView1<f32>) -> f32 {
        let n = y.len().max(1) as f32;

        self.predict(x)
            .iter()
            .zip(y)
            .zip(w)
            .map(|((p, t), w)| w * (p - t).powi(2))
            .sum::<f32>()
            / n
    }
}

/// Solves `a · x = b` for a symmetric positive definite `a`, of which only the lower triangle is
/// read. `None` when `a` isn't positive definite.
fn cholesky_solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();

    for j in 0..n {
        let d = a[[j, j]] - (0..j).map(|k| a[[j, k]].powi(2)).sum::<f64>();
        if !(d > 0.0) {
            return None;
        }

        let d = d.sqrt();
        a[[j, j]] = d;

        for i in j + 1..n {
            let s = a[[i, j]] - (0..j).map(|k| a[[i, k]] * a[[j, k]]).sum::<f64>();
            a[[i, j]] = s / d;
        }
    }

    // L · z = b
    for i in 0..n {
        let s = b[i] - (0..i).map(|k| a[[i, k]] * b[k]).sum::<f64>();
        b[i] = s / a[[i, i]];
    }

    // Lᵀ · x = z
    for i in (0..n).rev() {
        let s = b[i] - (i + 1..n).map(|k| a[[k, i]] * b[k]).sum::<f64>();
        b[i] = s / a[[i, i]];
    }

    Some(b)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn recovers_an_exact_plane() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 3.0], [1.5, -1.0]];
        let y = x.map_axis(Axis(1), |row| 0.5 + 2.0 * row[0] - row[1]);
        let w = Array1::ones(5);

        let model = LinearRegression::fit(x.view(), y.view(), w.view()).unwrap();

        assert!((model.intercept() - 0.5).abs() < 1e-3);
        assert!((model.coef()[0] - 2.0).abs() < 1e-3);
        assert!((model.coef()[1] + 1.0).abs() < 1e-3);
        assert!(model.loss(x.view(), y.view(), w.view()) < 1e-6);
    }

    #[test]
    fn zero_weight_samples_are_ignored() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 2.0, 3.0, 100.0];
        let w = array![1.0, 1.0, 1.0, 0.0];

        let model = LinearRegression::fit(x.view(), y.view(), w.view()).unwrap();

        assert!((model.intercept() - 1.0).abs() < 1e-3);
        assert!((model.coef()[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn constant_templates_still_fit() {
        let x = array![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        let y = array![1.0, 3.0, 5.0];

        let model = LinearRegression::fit(x.view(), y.view(), Array1::ones(3).view()).unwrap();

        assert!((model.coef()[0] - 2.0).abs() < 1e-3);
        assert!(model.coef()[1].abs() < 1e-3);
    }

    #[test]
    fn no_weighted_samples_is_an_error() {
        let x = array![[0.0], [1.0]];
        let y = array![1.0, 2.0];

        assert!(matches!(
            LinearRegression::fit(x.view(), y.view(), Array1::zeros(2).view()),
            Err(SysnetErr::Configuration(_))
        ));
    }
}
