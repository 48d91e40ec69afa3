use ndarray::{Array2, ArrayView2};

use super::{
    LossFn,
    loss_fn::{check_shapes, weighted_mean, weighted_prime},
};
use crate::Result;

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        w: Option<ArrayView2<f32>>,
    ) -> Result<f32> {
        check_shapes(&y_pred, &y, w.as_ref())?;
        Ok(weighted_mean(&y_pred, &y, w.as_ref(), |p, t| (p - t).powi(2)))
    }

    fn loss_prime(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        w: Option<ArrayView2<f32>>,
    ) -> Result<Array2<f32>> {
        check_shapes(&y_pred, &y, w.as_ref())?;
        Ok(weighted_prime(&y_pred, &y, w.as_ref(), |p, t| 2.0 * (p - t)))
    }
}
