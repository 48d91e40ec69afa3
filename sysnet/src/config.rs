use std::{fs, num::NonZeroUsize, path::Path};

use machine_learning::specs::{
    LossFnSpec, ModelSpec, OptimizerSpec, ScheduleSpec, TrainerSpec,
};
use serde::{Deserialize, Serialize};

use crate::{
    Result, SysnetErr, ensemble::WeightConvention, pipeline::FailurePolicy,
    scaling::FeatureScaling,
};

/// The learning rate schedules that can be selected from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Triangular cycles between `base_lr` and `max_lr`.
    #[default]
    Cyclic,
    /// Cosine annealing from `max_lr` down to `base_lr`, restarting after
    /// `cycle_length_steps`, then twice as many steps, and so on.
    CosineWarmRestarts,
    /// `max_lr` at every step.
    Constant,
}

/// Everything that can be tuned about a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysnetConfig {
    /// `mse` or `poisson` (also `pll`).
    pub cost_function: String,
    /// `sgd`, `momentum`, `adam` or `adamw`.
    pub optimizer: String,
    pub schedule: ScheduleKind,
    pub base_lr: f32,
    pub max_lr: f32,
    pub cycle_length_steps: usize,
    pub num_cycles: Option<usize>,
    pub lr_decay_per_cycle: f32,
    pub cycle_momentum: Option<(f32, f32)>,

    pub momentum: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,

    pub num_partitions: usize,
    pub train_valid_ratio: f32,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub patience: usize,
    pub num_seeds_per_partition: usize,
    pub normalization_convention: WeightConvention,
    pub failure_policy: FailurePolicy,

    pub hidden_layers: Vec<usize>,
    pub batch_norm: bool,
    pub l1_alpha: f32,
    pub l2_alpha: f32,
    /// Runs a recursive feature elimination on every partition and trains on the templates it
    /// keeps.
    pub eliminate_features: bool,
    pub feature_scaling: FeatureScaling,
    pub shuffle: bool,
    pub seed: u64,

    pub find_lr: bool,
    pub find_l1: bool,
    pub find_structure: Vec<Vec<usize>>,
    pub tuning_epochs: usize,
}

impl Default for SysnetConfig {
    fn default() -> Self {
        Self {
            cost_function: "mse".to_string(),
            optimizer: "adamw".to_string(),
            schedule: ScheduleKind::Cyclic,
            base_lr: 1e-3,
            max_lr: 1e-2,
            cycle_length_steps: 200,
            num_cycles: None,
            lr_decay_per_cycle: 1.0,
            cycle_momentum: None,
            momentum: 0.9,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
            num_partitions: 5,
            train_valid_ratio: 0.75,
            batch_size: 256,
            max_epochs: 300,
            patience: 10,
            num_seeds_per_partition: 1,
            normalization_convention: WeightConvention::Inverse,
            failure_policy: FailurePolicy::Abort,
            hidden_layers: vec![20, 20],
            batch_norm: true,
            l1_alpha: 1e-3,
            l2_alpha: 0.0,
            eliminate_features: false,
            feature_scaling: FeatureScaling::ZScore,
            shuffle: true,
            seed: 42,
            find_lr: false,
            find_l1: false,
            find_structure: vec![],
            tuning_epochs: 5,
        }
    }
}

impl SysnetConfig {
    /// Reads a JSON configuration, missing options take their default value.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every option that can be checked without looking at the data.
    ///
    /// # Returns
    /// A configuration error describing the first invalid option.
    pub fn validate(&self) -> Result<()> {
        self.loss_spec()?;
        self.optimizer_spec()?;

        if self.num_partitions <= 1 {
            return Err(SysnetErr::config(format!(
                "num_partitions must be at least 2, got {}",
                self.num_partitions
            )));
        }

        if !(self.train_valid_ratio > 0.0 && self.train_valid_ratio < 1.0) {
            return Err(SysnetErr::config(format!(
                "train_valid_ratio must be in (0, 1), got {}",
                self.train_valid_ratio
            )));
        }

        let positive = [
            ("batch_size", self.batch_size),
            ("max_epochs", self.max_epochs),
            ("patience", self.patience),
            ("num_seeds_per_partition", self.num_seeds_per_partition),
            ("cycle_length_steps", self.cycle_length_steps),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SysnetErr::config(format!("{name} must be at least 1")));
        }

        if self.hidden_layers.contains(&0) || self.find_structure.iter().flatten().any(|&w| w == 0) {
            return Err(SysnetErr::config("hidden layers must have at least one unit"));
        }

        if !(self.base_lr > 0.0 && self.base_lr <= self.max_lr && self.max_lr.is_finite()) {
            return Err(SysnetErr::config(format!(
                "learning rates need 0 < base_lr <= max_lr, got {} and {}",
                self.base_lr, self.max_lr
            )));
        }

        for (name, alpha) in [("l1_alpha", self.l1_alpha), ("l2_alpha", self.l2_alpha)] {
            if !(alpha >= 0.0 && alpha.is_finite()) {
                return Err(SysnetErr::config(format!(
                    "{name} must be non-negative, got {alpha}"
                )));
            }
        }

        if !(1..10).contains(&self.tuning_epochs) {
            return Err(SysnetErr::config(format!(
                "tuning_epochs must be in [1, 10), got {}",
                self.tuning_epochs
            )));
        }

        Ok(())
    }

    pub fn loss_spec(&self) -> Result<LossFnSpec> {
        Ok(self.cost_function.parse::<LossFnSpec>()?)
    }

    /// Resolves the optimizer's name and hyper-parameters into its specification.
    pub fn optimizer_spec(&self) -> Result<OptimizerSpec> {
        let spec = match self.optimizer.parse::<OptimizerSpec>()? {
            OptimizerSpec::GradientDescent => OptimizerSpec::GradientDescent,
            OptimizerSpec::GradientDescentWithMomentum { .. } => {
                OptimizerSpec::GradientDescentWithMomentum {
                    momentum: self.momentum,
                }
            }
            OptimizerSpec::Adam { .. } => OptimizerSpec::Adam {
                beta1: self.beta1,
                beta2: self.beta2,
                epsilon: self.epsilon,
            },
            OptimizerSpec::AdamW { .. } => OptimizerSpec::AdamW {
                beta1: self.beta1,
                beta2: self.beta2,
                epsilon: self.epsilon,
                weight_decay: self.weight_decay,
            },
        };

        Ok(spec)
    }

    pub fn schedule_spec(&self) -> ScheduleSpec {
        match self.schedule {
            ScheduleKind::Cyclic => ScheduleSpec::Cyclic {
                base_lr: self.base_lr,
                max_lr: self.max_lr,
                cycle_len: self.cycle_length_steps,
                num_cycles: self.num_cycles,
                decay: self.lr_decay_per_cycle,
                momentum: self.cycle_momentum,
            },
            ScheduleKind::CosineWarmRestarts => ScheduleSpec::CosineWarmRestarts {
                max_lr: self.max_lr,
                min_lr: self.base_lr,
                first_period: self.cycle_length_steps,
                period_mult: 2,
            },
            ScheduleKind::Constant => ScheduleSpec::Constant { lr: self.max_lr },
        }
    }

    /// Builds the specification of a single training run.
    ///
    /// # Arguments
    /// * `x_size` - The amount of templates.
    /// * `seed` - The seed of this run, drives initialization and shuffling.
    pub fn trainer_spec(&self, x_size: usize, seed: u64) -> Result<TrainerSpec> {
        let batch_size = NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| SysnetErr::config("batch_size must be at least 1"))?;

        Ok(TrainerSpec {
            model: ModelSpec {
                x_size,
                hidden: self.hidden_layers.clone(),
                batch_norm: self.batch_norm,
            },
            optimizer: self.optimizer_spec()?,
            loss: self.loss_spec()?,
            schedule: self.schedule_spec(),
            batch_size,
            max_epochs: self.max_epochs,
            patience: self.patience,
            shuffle: self.shuffle,
            l1_alpha: self.l1_alpha,
            l2_alpha: self.l2_alpha,
            seed,
        })
    }
}
