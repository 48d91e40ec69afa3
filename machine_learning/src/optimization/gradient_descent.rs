use super::{Optimizer, check_sizes};
use crate::Result;

/// Gradient descent optimization algorithm.
#[derive(Debug, Default, Clone)]
pub struct GradientDescent;

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32], learning_rate: f32) -> Result<()> {
        check_sizes(params, grad, params.len())?;

        for (p, g) in params.iter_mut().zip(grad) {
            *p -= learning_rate * g;
        }

        Ok(())
    }

    fn reset(&mut self) {}
}
