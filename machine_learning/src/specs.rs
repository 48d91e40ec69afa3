use std::{num::NonZeroUsize, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::MlErr;

/// The specification for the `LossFn` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFnSpec {
    #[default]
    Mse,
    #[serde(alias = "pll")]
    Poisson,
}

impl FromStr for LossFnSpec {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mse" => Ok(Self::Mse),
            "pll" | "poisson" => Ok(Self::Poisson),
            other => Err(MlErr::config(format!("unsupported cost function `{other}`"))),
        }
    }
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    #[serde(alias = "sgd")]
    GradientDescent,
    GradientDescentWithMomentum {
        momentum: f32,
    },
    Adam {
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    #[serde(alias = "adamw")]
    AdamW {
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
    },
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::AdamW {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
        }
    }
}

impl FromStr for OptimizerSpec {
    type Err = MlErr;

    /// Parses an optimizer name into its specification with the usual hyper-parameters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::GradientDescent),
            "momentum" => Ok(Self::GradientDescentWithMomentum { momentum: 0.9 }),
            "adam" => Ok(Self::Adam {
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            }),
            "adamw" => Ok(Self::default()),
            other => Err(MlErr::config(format!("unsupported optimizer `{other}`"))),
        }
    }
}

/// The specification for the `Schedule` trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSpec {
    Constant {
        lr: f32,
    },
    Cyclic {
        base_lr: f32,
        max_lr: f32,
        cycle_len: usize,
        num_cycles: Option<usize>,
        decay: f32,
        momentum: Option<(f32, f32)>,
    },
    CosineWarmRestarts {
        max_lr: f32,
        min_lr: f32,
        first_period: usize,
        period_mult: usize,
    },
}

/// The specification for a fully connected `Sequential` regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub x_size: usize,
    pub hidden: Vec<usize>,
    pub batch_norm: bool,
}

/// The specification for the `Trainer` trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSpec {
    pub model: ModelSpec,
    pub optimizer: OptimizerSpec,
    pub loss: LossFnSpec,
    pub schedule: ScheduleSpec,
    pub batch_size: NonZeroUsize,
    pub max_epochs: usize,
    pub patience: usize,
    pub shuffle: bool,
    pub l1_alpha: f32,
    #[serde(default)]
    pub l2_alpha: f32,
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("MSE".parse::<LossFnSpec>().unwrap(), LossFnSpec::Mse);
        assert_eq!("pll".parse::<LossFnSpec>().unwrap(), LossFnSpec::Poisson);
        assert_eq!("SGD".parse::<OptimizerSpec>().unwrap(), OptimizerSpec::GradientDescent);
        assert!(matches!(
            "AdamW".parse::<OptimizerSpec>().unwrap(),
            OptimizerSpec::AdamW { .. }
        ));
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        assert!(matches!(
            "huber".parse::<LossFnSpec>(),
            Err(MlErr::Configuration(_))
        ));
        assert!(matches!(
            "rmsprop".parse::<OptimizerSpec>(),
            Err(MlErr::Configuration(_))
        ));
    }

    #[test]
    fn specs_deserialize_from_json() {
        let loss: LossFnSpec = serde_json::from_str("\"pll\"").unwrap();
        assert_eq!(loss, LossFnSpec::Poisson);

        let schedule: ScheduleSpec = serde_json::from_str(
            r#"{"cyclic": {"base_lr": 0.001, "max_lr": 0.01, "cycle_len": 20,
                "num_cycles": null, "decay": 1.0, "momentum": [0.85, 0.95]}}"#,
        )
        .unwrap();
        assert!(matches!(schedule, ScheduleSpec::Cyclic { cycle_len: 20, .. }));
    }
}
