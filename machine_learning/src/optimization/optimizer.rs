use crate::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
///
/// Optimizers own their per-parameter state, given the same state and the same inputs they
/// always produce the same update.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `params` - The parameters to update.
    /// * `grad` - The gradient of the loss with respect to `params`.
    /// * `learning_rate` - The step length for this update, usually given by a schedule.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad`, `params` and the inner state.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32], learning_rate: f32) -> Result<()>;

    /// Replaces the momentum-like hyper-parameter, for schedules that cycle it. Optimizers
    /// without one ignore it.
    fn set_momentum(&mut self, _momentum: f32) {}

    /// Forgets every accumulated statistic, as if no update had ever happened.
    fn reset(&mut self);
}
