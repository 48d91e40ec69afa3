use std::sync::atomic::AtomicBool;

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{Checkpoint, LrSweep, StopReason};
use crate::{Result, arch::ModelState, dataset::Dataset};

/// The per-epoch losses of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub train: Vec<f32>,
    pub valid: Vec<f32>,
}

/// Everything a finished training run leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// The model as it was at its best validation epoch.
    pub best: Checkpoint,
    pub history: LossHistory,
    pub stop_reason: StopReason,
    pub epochs_run: usize,
    pub steps: usize,
}

impl TrainingOutcome {
    /// Returns the lowest training loss of the run.
    pub fn min_train_loss(&self) -> f32 {
        self.history
            .train
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min)
    }

    pub fn best_val_loss(&self) -> f32 {
        self.best.val_loss
    }
}

/// This trait is used for dynamic dispatch, the trainer's generic parameters are resolved once
/// by the `TrainerBuilder`.
pub trait Trainer: Send {
    /// Trains the model from its initial parameters until it stops improving on `valid`.
    ///
    /// # Arguments
    /// * `train` - The training fold, its visiting order is shuffled in place.
    /// * `valid` - The validation fold.
    /// * `cancel` - An optional flag, checked at every epoch boundary, that aborts the run.
    ///
    /// # Returns
    /// The outcome of the run or an error if occurred.
    fn train(
        &mut self,
        train: &mut Dataset,
        valid: &Dataset,
        cancel: Option<&AtomicBool>,
    ) -> Result<TrainingOutcome>;

    /// Predicts `x` with a snapshot of the model, in evaluation mode.
    fn predict(&mut self, state: &ModelState, x: ArrayView2<f32>) -> Result<Array1<f32>>;

    /// Computes the unregularized loss of a snapshot of the model on `data`, in evaluation mode.
    fn evaluate(&mut self, state: &ModelState, data: &Dataset) -> Result<f32>;

    /// Sweeps the learning rate exponentially from `start_lr` to `end_lr` over `num_steps`
    /// mini-batches, recording the loss at every step.
    ///
    /// The trainer is left as it was before the sweep.
    fn range_test(
        &mut self,
        data: &mut Dataset,
        start_lr: f32,
        end_lr: f32,
        num_steps: usize,
    ) -> Result<LrSweep>;

    /// Returns the amount of trainable parameters.
    fn size(&self) -> usize;
}
