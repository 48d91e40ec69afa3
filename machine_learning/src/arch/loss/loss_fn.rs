use ndarray::{Array2, ArrayView2};

use crate::{MlErr, Result};

/// A cost function over a batch of scalar predictions.
///
/// Both methods take an optional per-sample weight, `None` weighs every sample equally. The loss
/// is the weighted sum of the per-sample costs divided by the amount of samples, so the gradient
/// of sample `i` is `w_i * dc(p_i, t_i) / N`.
pub trait LossFn {
    /// Computes the scalar loss.
    fn loss(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        w: Option<ArrayView2<f32>>,
    ) -> Result<f32>;

    /// Computes the gradient of the loss with respect to `y_pred`, it has the shape of `y_pred`.
    fn loss_prime(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        w: Option<ArrayView2<f32>>,
    ) -> Result<Array2<f32>>;
}

/// Validates that predictions, targets and weights all describe the same samples.
pub(super) fn check_shapes(
    y_pred: &ArrayView2<f32>,
    y: &ArrayView2<f32>,
    w: Option<&ArrayView2<f32>>,
) -> Result<()> {
    if y.dim() != y_pred.dim() {
        return Err(MlErr::SizeMismatch {
            what: "targets",
            got: y.len(),
            expected: y_pred.len(),
        });
    }

    match w {
        Some(w) if w.dim() != y_pred.dim() => Err(MlErr::SizeMismatch {
            what: "weights",
            got: w.len(),
            expected: y_pred.len(),
        }),
        _ => Ok(()),
    }
}

/// Folds `cost(p, t) * w` over every sample and divides by the amount of samples.
pub(super) fn weighted_mean<F>(
    y_pred: &ArrayView2<f32>,
    y: &ArrayView2<f32>,
    w: Option<&ArrayView2<f32>>,
    cost: F,
) -> f32
where
    F: Fn(f32, f32) -> f32,
{
    let n = y_pred.len();
    if n == 0 {
        return 0.0;
    }

    let total: f32 = match w {
        Some(w) => y_pred
            .iter()
            .zip(y.iter())
            .zip(w.iter())
            .map(|((&p, &t), &w)| w * cost(p, t))
            .sum(),
        None => y_pred.iter().zip(y.iter()).map(|(&p, &t)| cost(p, t)).sum(),
    };

    total / n as f32
}

/// Builds the per-sample gradient `w * dcost(p, t) / N`.
pub(super) fn weighted_prime<F>(
    y_pred: &ArrayView2<f32>,
    y: &ArrayView2<f32>,
    w: Option<&ArrayView2<f32>>,
    dcost: F,
) -> Array2<f32>
where
    F: Fn(f32, f32) -> f32,
{
    let scale = 1.0 / y_pred.len().max(1) as f32;
    let mut d = y_pred.to_owned();
    d.zip_mut_with(y, |d, &t| *d = dcost(*d, t) * scale);

    if let Some(w) = w {
        d.zip_mut_with(w, |d, &w| *d *= w);
    }

    d
}
