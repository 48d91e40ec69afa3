use super::Schedule;
use crate::{MlErr, Result};

/// Sweeps the learning rate geometrically from `start_lr` to `end_lr` over `num_steps` steps,
/// holding `end_lr` afterwards.
#[derive(Debug, Clone)]
pub struct ExponentialLr {
    start_lr: f32,
    end_lr: f32,
    num_steps: usize,
}

impl ExponentialLr {
    /// Creates a new `ExponentialLr`.
    ///
    /// # Returns
    /// A configuration error unless `0 < start_lr < end_lr` and `num_steps >= 2`.
    pub fn new(start_lr: f32, end_lr: f32, num_steps: usize) -> Result<Self> {
        if !(start_lr > 0. && start_lr < end_lr && end_lr.is_finite()) || num_steps < 2 {
            return Err(MlErr::config(format!(
                "an exponential sweep needs 0 < start_lr < end_lr and 2 steps, got {start_lr}, {end_lr} and {num_steps}"
            )));
        }

        Ok(Self {
            start_lr,
            end_lr,
            num_steps,
        })
    }
}

impl Schedule for ExponentialLr {
    fn rate(&self, step: usize) -> f32 {
        let r = step.min(self.num_steps - 1) as f64 / (self.num_steps - 1) as f64;
        let ratio = self.end_lr as f64 / self.start_lr as f64;

        (self.start_lr as f64 * ratio.powf(r)) as f32
    }
}
