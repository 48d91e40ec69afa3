use serde::{Deserialize, Serialize};

use crate::arch::ModelState;

/// Why a training run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The validation loss didn't improve for `patience` epochs in a row.
    Patience,
    /// The maximum amount of epochs was reached.
    MaxEpochs,
}

/// The phases a training run goes through.
///
/// ```text
/// Initializing -> Training -> Validating -> Improved | Stagnant -> Training | Stopped -> Finalized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Initializing,
    Training,
    Validating,
    Improved,
    Stagnant,
    Stopped(StopReason),
    Finalized,
}

/// A snapshot of the model taken when the validation loss improved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub step: usize,
    pub val_loss: f32,
    pub state: ModelState,
}

/// The mutable bookkeeping of a single training run.
///
/// Every run owns its own `TrainingState`, nothing about the best model so far is shared between
/// runs.
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// The current epoch, starting at 0.
    pub epoch: usize,
    /// The amount of mini-batch updates made so far, it drives the learning rate schedule.
    pub step: usize,
    phase: TrainingPhase,
    best_val_loss: f32,
    stagnant_epochs: usize,
    patience: usize,
    max_epochs: usize,
    best: Option<Checkpoint>,
}

impl TrainingState {
    /// Creates a new `TrainingState`.
    ///
    /// # Arguments
    /// * `patience` - How many epochs without improvement stop the run.
    /// * `max_epochs` - The maximum amount of epochs to run.
    pub fn new(patience: usize, max_epochs: usize) -> Self {
        Self {
            epoch: 0,
            step: 0,
            phase: TrainingPhase::Initializing,
            best_val_loss: f32::INFINITY,
            stagnant_epochs: 0,
            patience,
            max_epochs,
            best: None,
        }
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn best_val_loss(&self) -> f32 {
        self.best_val_loss
    }

    pub fn best(&self) -> Option<&Checkpoint> {
        self.best.as_ref()
    }

    pub fn stagnant_epochs(&self) -> usize {
        self.stagnant_epochs
    }

    /// Enters the training phase of the current epoch.
    pub fn start_epoch(&mut self) {
        self.phase = TrainingPhase::Training;
    }

    /// Enters the validation phase of the current epoch.
    pub fn start_validation(&mut self) {
        self.phase = TrainingPhase::Validating;
    }

    /// Records the validation loss of the current epoch and decides what comes next.
    ///
    /// A loss strictly lower than the best so far checkpoints the model through `snapshot`, which
    /// is only called in that case. The run stops once `patience` epochs in a row didn't improve
    /// or after `max_epochs` epochs, otherwise the state moves on to the next epoch.
    ///
    /// # Returns
    /// The phase the run is left in: `Improved` or `Stagnant` to keep going, `Stopped` to stop.
    pub fn on_validation<F>(&mut self, val_loss: f32, snapshot: F) -> TrainingPhase
    where
        F: FnOnce() -> ModelState,
    {
        if val_loss < self.best_val_loss {
            self.best_val_loss = val_loss;
            self.stagnant_epochs = 0;
            self.best = Some(Checkpoint {
                epoch: self.epoch,
                step: self.step,
                val_loss,
                state: snapshot(),
            });
            self.phase = TrainingPhase::Improved;
        } else {
            self.stagnant_epochs += 1;
            self.phase = TrainingPhase::Stagnant;
        }

        if self.stagnant_epochs >= self.patience {
            self.phase = TrainingPhase::Stopped(StopReason::Patience);
        } else if self.epoch + 1 >= self.max_epochs {
            self.phase = TrainingPhase::Stopped(StopReason::MaxEpochs);
        } else {
            self.epoch += 1;
        }

        self.phase
    }

    /// Ends the run, handing over the best checkpoint.
    pub fn finalize(&mut self) -> Option<Checkpoint> {
        self.phase = TrainingPhase::Finalized;
        self.best.take()
    }
}
