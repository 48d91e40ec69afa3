use super::{Adam, Optimizer};
use crate::Result;

/// Adam with decoupled weight decay: the parameters shrink by `lr * weight_decay` before the
/// adaptive step instead of the decay being folded into the gradient.
#[derive(Debug, Clone)]
pub struct AdamW {
    adam: Adam,
    weight_decay: f32,
}

impl AdamW {
    /// Creates a new `AdamW` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `beta1`, `beta2` - The decay rates of the first and second moment estimates.
    /// * `epsilon` - Stabilizes the denominator.
    /// * `weight_decay` - The decoupled decay coefficient.
    pub fn new(len: usize, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            adam: Adam::new(len, beta1, beta2, epsilon),
            weight_decay,
        }
    }
}

impl Optimizer for AdamW {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32], learning_rate: f32) -> Result<()> {
        super::check_sizes(params, grad, self.adam.len())?;

        let decay = 1. - learning_rate * self.weight_decay;
        params.iter_mut().for_each(|p| *p *= decay);

        self.adam.update_params(params, grad, learning_rate)
    }

    fn set_momentum(&mut self, momentum: f32) {
        self.adam.set_momentum(momentum);
    }

    fn reset(&mut self) {
        self.adam.reset();
    }
}
