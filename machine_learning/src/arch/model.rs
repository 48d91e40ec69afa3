use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::Mode;
use crate::Result;

/// Everything needed to reproduce a model's predictions: its trainable parameters and the
/// running statistics of its normalization layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub params: Vec<f32>,
    pub running_stats: Vec<f32>,
}

/// A differentiable model whose parameters live outside of it, in a flat buffer.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Sets whether the model is being trained or evaluated.
    fn set_mode(&mut self, mode: Mode);

    fn mode(&self) -> Mode;

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input data, one row per sample.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Back propagates `d`, the gradient of the loss with respect to the last forward's output.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - A buffer the size of `params`, overwritten with the gradient.
    /// * `d` - The gradient of the loss with respect to the prediction.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()>;

    /// Returns the running statistics of the model, in layer order.
    fn running_stats(&self) -> Vec<f32>;

    /// Overwrites the running statistics of the model.
    fn load_running_stats(&mut self, stats: &[f32]) -> Result<()>;

    /// Returns where the weights of the first layer live inside the parameter buffer, these are
    /// the ones subject to L1 regularization.
    fn first_weights(&self) -> Option<Range<usize>>;

    /// Takes a snapshot of the model.
    fn state(&self, params: &[f32]) -> ModelState {
        ModelState {
            params: params.to_vec(),
            running_stats: self.running_stats(),
        }
    }
}
