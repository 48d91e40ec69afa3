use rand::{SeedableRng, rngs::StdRng};

use super::{ModelTrainer, Trainer, TrainerConfig};
use crate::{
    MlErr, Result,
    arch::{
        Model, Sequential,
        activations::ActFn,
        loss::{LossFn, Mse, PoissonNll},
    },
    optimization::{Adam, AdamW, GradientDescent, GradientDescentWithMomentum, Optimizer},
    schedule::{ConstantLr, CosineWarmRestarts, CyclicLr, Schedule},
    specs::{LossFnSpec, ModelSpec, OptimizerSpec, ScheduleSpec, TrainerSpec},
};

/// Builds `Trainer`s given a specification.
///
/// Every name in the specification is resolved here, once, into a concrete generic
/// `ModelTrainer`.
#[derive(Default)]
pub struct TrainerBuilder;

impl TrainerBuilder {
    /// Creates a new `TrainerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Trainer` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the trainer.
    ///
    /// # Returns
    /// The trainer, with freshly initialized parameters, or a configuration error.
    pub fn build(&self, spec: &TrainerSpec) -> Result<Box<dyn Trainer>> {
        let mut seeds = StdRng::seed_from_u64(spec.seed);
        let init_rng = StdRng::from_rng(&mut seeds);
        let shuffle_rng = StdRng::from_rng(&mut seeds);

        self.resolve_model(spec, init_rng, shuffle_rng)
    }

    fn resolve_model(
        &self,
        spec: &TrainerSpec,
        init_rng: StdRng,
        shuffle_rng: StdRng,
    ) -> Result<Box<dyn Trainer>> {
        let ModelSpec {
            x_size,
            hidden,
            batch_norm,
        } = &spec.model;

        if *x_size == 0 {
            return Err(MlErr::config("the model needs at least one input feature"));
        }

        if hidden.contains(&0) {
            return Err(MlErr::config(format!(
                "hidden layers can't be empty, got {hidden:?}"
            )));
        }

        // The poisson cost is only defined for positive predictions.
        let output = match spec.loss {
            LossFnSpec::Mse => None,
            LossFnSpec::Poisson => Some(ActFn::exp()),
        };

        let model = Sequential::mlp(*x_size, hidden, *batch_norm, output);
        let params = model.init_params(init_rng)?;

        self.resolve_optimizer(spec, model, params, shuffle_rng)
    }

    fn resolve_optimizer<M>(
        &self,
        spec: &TrainerSpec,
        model: M,
        params: Vec<f32>,
        rng: StdRng,
    ) -> Result<Box<dyn Trainer>>
    where
        M: Model + Send + 'static,
    {
        let len = params.len();

        match spec.optimizer {
            OptimizerSpec::GradientDescent => {
                let optimizer = GradientDescent::new();
                self.resolve_loss(spec, model, params, optimizer, rng)
            }
            OptimizerSpec::GradientDescentWithMomentum { momentum } => {
                check_unit("momentum", momentum)?;
                let optimizer = GradientDescentWithMomentum::new(len, momentum);
                self.resolve_loss(spec, model, params, optimizer, rng)
            }
            OptimizerSpec::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                check_adam(beta1, beta2, epsilon)?;
                let optimizer = Adam::new(len, beta1, beta2, epsilon);
                self.resolve_loss(spec, model, params, optimizer, rng)
            }
            OptimizerSpec::AdamW {
                beta1,
                beta2,
                epsilon,
                weight_decay,
            } => {
                check_adam(beta1, beta2, epsilon)?;
                if !(weight_decay >= 0.0 && weight_decay.is_finite()) {
                    return Err(MlErr::config(format!(
                        "weight_decay must be non-negative, got {weight_decay}"
                    )));
                }

                let optimizer = AdamW::new(len, beta1, beta2, epsilon, weight_decay);
                self.resolve_loss(spec, model, params, optimizer, rng)
            }
        }
    }

    fn resolve_loss<M, O>(
        &self,
        spec: &TrainerSpec,
        model: M,
        params: Vec<f32>,
        optimizer: O,
        rng: StdRng,
    ) -> Result<Box<dyn Trainer>>
    where
        M: Model + Send + 'static,
        O: Optimizer + Send + 'static,
    {
        match spec.loss {
            LossFnSpec::Mse => {
                let loss_fn = Mse::new();
                self.resolve_schedule(spec, model, params, optimizer, loss_fn, rng)
            }
            LossFnSpec::Poisson => {
                let loss_fn = PoissonNll::new();
                self.resolve_schedule(spec, model, params, optimizer, loss_fn, rng)
            }
        }
    }

    fn resolve_schedule<M, O, L>(
        &self,
        spec: &TrainerSpec,
        model: M,
        params: Vec<f32>,
        optimizer: O,
        loss_fn: L,
        rng: StdRng,
    ) -> Result<Box<dyn Trainer>>
    where
        M: Model + Send + 'static,
        O: Optimizer + Send + 'static,
        L: LossFn + Send + 'static,
    {
        match spec.schedule {
            ScheduleSpec::Constant { lr } => {
                if !(lr > 0.0 && lr.is_finite()) {
                    return Err(MlErr::config(format!("lr must be positive, got {lr}")));
                }

                let schedule = ConstantLr(lr);
                self.terminate_build(spec, model, params, optimizer, loss_fn, schedule, rng)
            }
            ScheduleSpec::Cyclic {
                base_lr,
                max_lr,
                cycle_len,
                num_cycles,
                decay,
                momentum,
            } => {
                let mut schedule = CyclicLr::new(base_lr, max_lr, cycle_len)?.with_decay(decay)?;

                if let Some(num_cycles) = num_cycles {
                    schedule = schedule.with_num_cycles(num_cycles);
                }

                if let Some((base_momentum, max_momentum)) = momentum {
                    schedule = schedule.with_momentum(base_momentum, max_momentum)?;
                }

                self.terminate_build(spec, model, params, optimizer, loss_fn, schedule, rng)
            }
            ScheduleSpec::CosineWarmRestarts {
                max_lr,
                min_lr,
                first_period,
                period_mult,
            } => {
                let schedule = CosineWarmRestarts::new(max_lr, min_lr, first_period, period_mult)?;
                self.terminate_build(spec, model, params, optimizer, loss_fn, schedule, rng)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn terminate_build<M, O, L, S>(
        &self,
        spec: &TrainerSpec,
        model: M,
        params: Vec<f32>,
        optimizer: O,
        loss_fn: L,
        schedule: S,
        rng: StdRng,
    ) -> Result<Box<dyn Trainer>>
    where
        M: Model + Send + 'static,
        O: Optimizer + Send + 'static,
        L: LossFn + Send + 'static,
        S: Schedule + Send + 'static,
    {
        let config = TrainerConfig {
            batch_size: spec.batch_size,
            max_epochs: spec.max_epochs,
            patience: spec.patience,
            shuffle: spec.shuffle,
            l1_alpha: spec.l1_alpha,
            l2_alpha: spec.l2_alpha,
        };

        let trainer = ModelTrainer::new(model, optimizer, loss_fn, schedule, params, config, rng)?;
        Ok(Box::new(trainer))
    }
}

fn check_unit(what: &str, value: f32) -> Result<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(MlErr::config(format!("{what} must be in [0, 1), got {value}")));
    }

    Ok(())
}

fn check_adam(beta1: f32, beta2: f32, epsilon: f32) -> Result<()> {
    check_unit("beta1", beta1)?;
    check_unit("beta2", beta2)?;

    if !(epsilon > 0.0) {
        return Err(MlErr::config(format!("epsilon must be positive, got {epsilon}")));
    }

    Ok(())
}
