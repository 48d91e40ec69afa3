mod builder;
mod lr_finder;
mod model_trainer;
mod state;
mod trainer;

pub use builder::TrainerBuilder;
pub use lr_finder::{LrProbe, LrSweep};
pub use model_trainer::{ModelTrainer, TrainerConfig};
pub use state::{Checkpoint, StopReason, TrainingPhase, TrainingState};
pub use trainer::{LossHistory, Trainer, TrainingOutcome};
