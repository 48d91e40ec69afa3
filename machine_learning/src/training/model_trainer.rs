use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicBool, Ordering},
};

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;

use super::{
    LossHistory, LrSweep, Trainer, TrainingOutcome, TrainingPhase, TrainingState,
};
use crate::{
    MlErr, Result,
    arch::{Mode, Model, ModelState, loss::LossFn},
    dataset::{Batch, Dataset},
    optimization::Optimizer,
    schedule::{ExponentialLr, Schedule},
};

/// The knobs of the training loop that aren't components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerConfig {
    pub batch_size: NonZeroUsize,
    pub max_epochs: usize,
    pub patience: usize,
    pub shuffle: bool,
    pub l1_alpha: f32,
    pub l2_alpha: f32,
}

impl TrainerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(MlErr::config("max_epochs must be at least 1"));
        }

        if self.patience == 0 {
            return Err(MlErr::config("patience must be at least 1"));
        }

        for (name, alpha) in [("l1_alpha", self.l1_alpha), ("l2_alpha", self.l2_alpha)] {
            if !(alpha >= 0.0 && alpha.is_finite()) {
                return Err(MlErr::config(format!(
                    "{name} must be a non-negative number, got {alpha}"
                )));
            }
        }

        Ok(())
    }
}

/// A model `Trainer`. Contains the relevant components needed for training a model,
/// including the model itself and its parameters.
pub struct ModelTrainer<M, O, L, S, R>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    S: Schedule,
    R: Rng,
{
    model: M,
    optimizer: O,
    loss_fn: L,
    schedule: S,

    params: Vec<f32>,
    grad: Vec<f32>,
    config: TrainerConfig,
    rng: R,
}

impl<M, O, L, S, R> ModelTrainer<M, O, L, S, R>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    S: Schedule,
    R: Rng,
{
    /// Returns a new `ModelTrainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `optimizer` - The optimizer, sized for the model's parameters.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output and the expected one.
    /// * `schedule` - The learning rate for every step.
    /// * `params` - The initial parameters of the model.
    /// * `config` - Batch size, stopping criteria, shuffling and regularization.
    /// * `rng` - A random number generator, used for shuffling.
    ///
    /// # Returns
    /// A new `ModelTrainer` or an error if the parameters don't fit the model or the config is
    /// invalid.
    pub fn new(
        model: M,
        optimizer: O,
        loss_fn: L,
        schedule: S,
        params: Vec<f32>,
        config: TrainerConfig,
        rng: R,
    ) -> Result<Self> {
        config.validate()?;

        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: model.size(),
            });
        }

        Ok(Self {
            grad: vec![0.0; params.len()],
            model,
            optimizer,
            loss_fn,
            schedule,
            params,
            config,
            rng,
        })
    }

    /// Returns the current parameters of the model.
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Runs the training loop until the validation loss stops improving or `max_epochs` is
    /// reached.
    ///
    /// # Arguments
    /// * `train` - The training fold.
    /// * `valid` - The validation fold.
    /// * `cancel` - Aborts the run at the next epoch boundary when set.
    ///
    /// # Returns
    /// The best checkpoint and the loss history, or an error if the run failed.
    pub fn train(
        &mut self,
        train: &mut Dataset,
        valid: &Dataset,
        cancel: Option<&AtomicBool>,
    ) -> Result<TrainingOutcome> {
        if train.is_empty() || valid.is_empty() {
            return Err(MlErr::config("both the training and validation folds need samples"));
        }

        let mut state = TrainingState::new(self.config.patience, self.config.max_epochs);
        let mut history = LossHistory::default();

        let stop_reason = loop {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                info!(epoch = state.epoch; "training cancelled");
                return Err(MlErr::Cancelled { epoch: state.epoch });
            }

            state.start_epoch();
            let train_loss = self.train_epoch(train, &mut state)?;

            state.start_validation();
            let val_loss = self.validation_loss(valid)?;
            if !val_loss.is_finite() {
                return Err(MlErr::NumericalInstability {
                    epoch: state.epoch,
                    step: state.step,
                    loss: val_loss,
                });
            }

            history.train.push(train_loss);
            history.valid.push(val_loss);

            debug!(
                epoch = state.epoch,
                step = state.step,
                train_loss = train_loss,
                val_loss = val_loss,
                lr = self.schedule.rate(state.step);
                "epoch finished"
            );

            let model = &self.model;
            let params = &self.params;
            let phase = state.on_validation(val_loss, || model.state(params));

            if let TrainingPhase::Stopped(reason) = phase {
                break reason;
            }
        };

        let epochs_run = history.valid.len();
        let steps = state.step;
        let best = state
            .finalize()
            .ok_or_else(|| MlErr::config("the run finished without a checkpoint"))?;

        debug!(
            best_epoch = best.epoch,
            best_val_loss = best.val_loss;
            "stopped after {epochs_run} epochs: {stop_reason:?}"
        );

        Ok(TrainingOutcome {
            best,
            history,
            stop_reason,
            epochs_run,
            steps,
        })
    }

    /// Predicts `x` with a snapshot of the model, in evaluation mode.
    ///
    /// The model's own running statistics and mode are restored afterwards.
    pub fn predict(&mut self, state: &ModelState, x: ArrayView2<f32>) -> Result<Array1<f32>> {
        let y_pred = self.with_snapshot(state, |model, params| model.forward(params, x))?;
        Ok(y_pred.column(0).to_owned())
    }

    /// Computes the unregularized loss of a snapshot of the model on `data`.
    pub fn evaluate(&mut self, state: &ModelState, data: &Dataset) -> Result<f32> {
        let y_pred = self.with_snapshot(state, |model, params| model.forward(params, data.x()))?;
        self.loss_fn.loss(y_pred.view(), data.y(), Some(data.w()))
    }

    /// Sweeps the learning rate exponentially over `num_steps` mini-batches.
    ///
    /// The parameters, running statistics and optimizer state are restored once it finishes.
    ///
    /// # Arguments
    /// * `data` - The samples to sweep with, cycled as many times as needed.
    /// * `start_lr` - The first learning rate.
    /// * `end_lr` - The last learning rate.
    /// * `num_steps` - The amount of mini-batches.
    pub fn range_test(
        &mut self,
        data: &mut Dataset,
        start_lr: f32,
        end_lr: f32,
        num_steps: usize,
    ) -> Result<LrSweep> {
        if data.is_empty() {
            return Err(MlErr::config("the range test needs samples"));
        }

        let schedule = ExponentialLr::new(start_lr, end_lr, num_steps)?;
        let params = self.params.clone();
        let stats = self.model.running_stats();

        self.optimizer.reset();
        self.model.set_mode(Mode::Train);

        let result = self.sweep(data, &schedule, num_steps);

        self.params = params;
        self.model.load_running_stats(&stats)?;
        self.optimizer.reset();

        let sweep = result?;
        info!(
            steps = sweep.probes().len(),
            diverged = sweep.diverged();
            "range test finished, suggested lr {:?}",
            sweep.suggestion()
        );

        Ok(sweep)
    }

    fn sweep(&mut self, data: &mut Dataset, schedule: &ExponentialLr, num_steps: usize) -> Result<LrSweep> {
        let mut sweep = LrSweep::new();
        let mut step = 0;

        while step < num_steps {
            if self.config.shuffle {
                data.shuffle(&mut self.rng);
            }

            for batch in data.batches(self.config.batch_size) {
                let lr = schedule.rate(step);
                let loss = match self.step(&batch, lr, 0, step) {
                    Ok(loss) => loss,
                    Err(MlErr::NumericalInstability { .. } | MlErr::Domain { .. }) => f32::NAN,
                    Err(e) => return Err(e),
                };

                step += 1;
                if !sweep.record(lr, loss) || step == num_steps {
                    return Ok(sweep);
                }
            }
        }

        Ok(sweep)
    }

    fn train_epoch(&mut self, train: &mut Dataset, state: &mut TrainingState) -> Result<f32> {
        self.model.set_mode(Mode::Train);

        if self.config.shuffle {
            train.shuffle(&mut self.rng);
        }

        let mut total = 0.0;
        let mut seen = 0;

        for batch in train.batches(self.config.batch_size) {
            let lr = self.schedule.rate(state.step);
            if let Some(momentum) = self.schedule.momentum(state.step) {
                self.optimizer.set_momentum(momentum);
            }

            let loss = self.step(&batch, lr, state.epoch, state.step)?;
            state.step += 1;

            total += loss * batch.len() as f32;
            seen += batch.len();
        }

        Ok(total / seen as f32)
    }

    /// Makes a single optimization step over `batch`.
    ///
    /// # Returns
    /// The regularized loss of the batch before the update.
    fn step(&mut self, batch: &Batch, lr: f32, epoch: usize, step: usize) -> Result<f32> {
        let y_pred = self.model.forward(&self.params, batch.x.view())?;
        let loss = self.loss_fn.loss(y_pred.view(), batch.y.view(), Some(batch.w.view()))?
            + self.penalty();

        if !loss.is_finite() {
            return Err(MlErr::NumericalInstability { epoch, step, loss });
        }

        let d = self
            .loss_fn
            .loss_prime(y_pred.view(), batch.y.view(), Some(batch.w.view()))?;
        self.model.backward(&self.params, &mut self.grad, d)?;
        self.add_penalty_grad();

        if self.grad.iter().any(|g| !g.is_finite()) {
            return Err(MlErr::NumericalInstability { epoch, step, loss });
        }

        self.optimizer.update_params(&mut self.params, &self.grad, lr)?;
        Ok(loss)
    }

    /// L1 on the first layer's weights plus L2 on every parameter.
    fn penalty(&self) -> f32 {
        let TrainerConfig {
            l1_alpha, l2_alpha, ..
        } = self.config;

        let l1 = match self.model.first_weights() {
            Some(range) if l1_alpha > 0.0 => {
                l1_alpha * self.params[range].iter().map(|w| w.abs()).sum::<f32>()
            }
            _ => 0.0,
        };

        let l2 = if l2_alpha > 0.0 {
            l2_alpha * self.params.iter().map(|p| p * p).sum::<f32>()
        } else {
            0.0
        };

        l1 + l2
    }

    fn add_penalty_grad(&mut self) {
        let TrainerConfig {
            l1_alpha, l2_alpha, ..
        } = self.config;

        if l2_alpha > 0.0 {
            for (g, p) in self.grad.iter_mut().zip(&self.params) {
                *g += 2.0 * l2_alpha * p;
            }
        }

        let Some(range) = self.model.first_weights().filter(|_| l1_alpha > 0.0) else {
            return;
        };

        for (g, w) in self.grad[range.clone()].iter_mut().zip(&self.params[range]) {
            if *w != 0.0 {
                *g += l1_alpha * w.signum();
            }
        }
    }

    fn validation_loss(&mut self, valid: &Dataset) -> Result<f32> {
        self.model.set_mode(Mode::Eval);
        let y_pred = self.model.forward(&self.params, valid.x())?;
        self.model.set_mode(Mode::Train);

        self.loss_fn.loss(y_pred.view(), valid.y(), Some(valid.w()))
    }

    fn with_snapshot<F>(&mut self, state: &ModelState, f: F) -> Result<Array2<f32>>
    where
        F: FnOnce(&mut M, &[f32]) -> Result<Array2<f32>>,
    {
        let stats = self.model.running_stats();
        let mode = self.model.mode();

        self.model.load_running_stats(&state.running_stats)?;
        self.model.set_mode(Mode::Eval);

        let result = f(&mut self.model, &state.params);

        self.model.load_running_stats(&stats)?;
        self.model.set_mode(mode);

        result
    }
}

impl<M, O, L, S, R> Trainer for ModelTrainer<M, O, L, S, R>
where
    M: Model + Send,
    O: Optimizer + Send,
    L: LossFn + Send,
    S: Schedule + Send,
    R: Rng + Send,
{
    fn train(
        &mut self,
        train: &mut Dataset,
        valid: &Dataset,
        cancel: Option<&AtomicBool>,
    ) -> Result<TrainingOutcome> {
        self.train(train, valid, cancel)
    }

    fn predict(&mut self, state: &ModelState, x: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.predict(state, x)
    }

    fn evaluate(&mut self, state: &ModelState, data: &Dataset) -> Result<f32> {
        self.evaluate(state, data)
    }

    fn range_test(
        &mut self,
        data: &mut Dataset,
        start_lr: f32,
        end_lr: f32,
        num_steps: usize,
    ) -> Result<LrSweep> {
        self.range_test(data, start_lr, end_lr, num_steps)
    }

    fn size(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{Sequential, loss::Mse},
        optimization::GradientDescent,
        schedule::ConstantLr,
        training::StopReason,
    };

    type LinearTrainer = ModelTrainer<Sequential, GradientDescent, Mse, ConstantLr, StdRng>;

    fn line(n: usize, offset: f32) -> Dataset {
        let xs: Vec<f32> = (0..n)
            .map(|i| -1.0 + 2.0 * i as f32 / (n - 1) as f32 + offset)
            .collect();
        let ys = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        let x = Array2::from_shape_vec((n, 1), xs).unwrap();
        Dataset::new(x, ys, vec![1.0; n]).unwrap()
    }

    fn config() -> TrainerConfig {
        TrainerConfig {
            batch_size: NonZeroUsize::new(16).unwrap(),
            max_epochs: 200,
            patience: 20,
            shuffle: true,
            l1_alpha: 0.0,
            l2_alpha: 0.0,
        }
    }

    fn trainer(model: Sequential, lr: f32, config: TrainerConfig) -> LinearTrainer {
        let params = model.init_params(StdRng::seed_from_u64(3)).unwrap();
        let optimizer = GradientDescent::new();

        ModelTrainer::new(
            model,
            optimizer,
            Mse::new(),
            ConstantLr(lr),
            params,
            config,
            StdRng::seed_from_u64(3),
        )
        .unwrap()
    }

    fn linear(lr: f32) -> LinearTrainer {
        trainer(Sequential::mlp(1, &[], false, None), lr, config())
    }

    #[test]
    fn fits_a_line() {
        let mut train = line(64, 0.0);
        let valid = line(16, 0.01);
        let mut trainer = linear(0.1);

        let outcome = trainer.train(&mut train, &valid, None).unwrap();

        assert!(outcome.best_val_loss() < 1e-4);
        assert_eq!(outcome.history.train.len(), outcome.epochs_run);
        assert_eq!(outcome.steps, outcome.epochs_run * 4);
        assert!(outcome.min_train_loss() <= outcome.history.train[0]);

        let x = ndarray::array![[0.0], [0.5]];
        let y = trainer.predict(&outcome.best.state, x.view()).unwrap();
        assert!((y[0] - 1.0).abs() < 1e-2);
        assert!((y[1] - 2.0).abs() < 1e-2);

        let test_loss = trainer.evaluate(&outcome.best.state, &valid).unwrap();
        assert!((test_loss - outcome.best_val_loss()).abs() < 1e-6);
    }

    #[test]
    fn same_seed_same_run() {
        let model = || Sequential::mlp(1, &[4], true, None);
        let mut a = trainer(model(), 0.05, config());
        let mut b = trainer(model(), 0.05, config());

        let outcome_a = a.train(&mut line(64, 0.0), &line(16, 0.01), None).unwrap();
        let outcome_b = b.train(&mut line(64, 0.0), &line(16, 0.01), None).unwrap();

        assert_eq!(outcome_a, outcome_b);
    }

    #[test]
    fn stops_at_max_epochs() {
        let config = TrainerConfig {
            max_epochs: 3,
            ..config()
        };
        let mut trainer = trainer(Sequential::mlp(1, &[], false, None), 0.01, config);

        let outcome = trainer
            .train(&mut line(64, 0.0), &line(16, 0.01), None)
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::MaxEpochs);
        assert_eq!(outcome.epochs_run, 3);
        assert_eq!(outcome.best.epoch, 2);
    }

    #[test]
    fn diverging_runs_fail() {
        let mut trainer = linear(1e3);
        let result = trainer.train(&mut line(64, 0.0), &line(16, 0.01), None);

        assert!(matches!(result, Err(MlErr::NumericalInstability { .. })));
    }

    #[test]
    fn cancelled_runs_fail_at_the_epoch_boundary() {
        let mut trainer = linear(0.1);
        let cancel = AtomicBool::new(true);
        let result = trainer.train(&mut line(64, 0.0), &line(16, 0.01), Some(&cancel));

        assert_eq!(result, Err(MlErr::Cancelled { epoch: 0 }));
    }

    #[test]
    fn l1_shrinks_the_first_layer() {
        let l1 = TrainerConfig {
            l1_alpha: 0.5,
            ..config()
        };
        let mut plain = trainer(Sequential::mlp(1, &[], false, None), 0.1, config());
        let mut sparse = trainer(Sequential::mlp(1, &[], false, None), 0.1, l1);

        let plain = plain.train(&mut line(64, 0.0), &line(16, 0.01), None).unwrap();
        let sparse = sparse.train(&mut line(64, 0.0), &line(16, 0.01), None).unwrap();

        assert!(sparse.best.state.params[0].abs() < plain.best.state.params[0].abs());
    }

    #[test]
    fn l2_shrinks_every_parameter() {
        let l2 = TrainerConfig {
            l2_alpha: 0.5,
            ..config()
        };
        let mut plain = trainer(Sequential::mlp(1, &[], false, None), 0.1, config());
        let mut ridge = trainer(Sequential::mlp(1, &[], false, None), 0.1, l2);

        let plain = plain.train(&mut line(64, 0.0), &line(16, 0.01), None).unwrap();
        let ridge = ridge.train(&mut line(64, 0.0), &line(16, 0.01), None).unwrap();

        let norm = |params: &[f32]| params.iter().map(|p| p * p).sum::<f32>();
        assert!(norm(&ridge.best.state.params) < norm(&plain.best.state.params));
        // the weight is pulled below the slope of the line
        assert!(ridge.best.state.params[0] < 1.9);
    }

    #[test]
    fn negative_penalties_are_rejected() {
        for config in [
            TrainerConfig {
                l1_alpha: -1.0,
                ..config()
            },
            TrainerConfig {
                l2_alpha: f32::NAN,
                ..config()
            },
        ] {
            let model = Sequential::mlp(1, &[], false, None);
            let params = model.init_params(StdRng::seed_from_u64(3)).unwrap();
            let result = ModelTrainer::new(
                model,
                GradientDescent::new(),
                Mse::new(),
                ConstantLr(0.1),
                params,
                config,
                StdRng::seed_from_u64(3),
            );

            assert!(matches!(result, Err(MlErr::Configuration(_))));
        }
    }

    #[test]
    fn validation_runs_in_evaluation_mode() {
        let mut trainer = trainer(Sequential::mlp(1, &[4], true, None), 0.05, config());
        let valid = line(16, 0.01);

        let outcome = trainer.train(&mut line(64, 0.0), &valid, None).unwrap();
        let reevaluated = trainer.evaluate(&outcome.best.state, &valid).unwrap();

        // evaluate always runs on the running statistics of the snapshot, a validation pass
        // on batch statistics would disagree with it
        assert!((reevaluated - outcome.best_val_loss()).abs() < 1e-6);
        assert_eq!(outcome.history.valid[outcome.best.epoch], outcome.best_val_loss());
    }

    #[test]
    fn range_test_leaves_the_trainer_untouched() {
        let mut trainer = linear(0.1);
        let before = trainer.params().to_vec();

        let sweep = trainer
            .range_test(&mut line(64, 0.0), 1e-5, 10.0, 40)
            .unwrap();

        assert_eq!(trainer.params(), before);
        assert!(!sweep.probes().is_empty());
        assert!(sweep.probes().len() <= 40);
        assert!(sweep.probes().windows(2).all(|w| w[0].lr < w[1].lr));
    }

    #[test]
    fn empty_folds_are_rejected() {
        let mut trainer = linear(0.1);
        let empty = Dataset::new(Array2::zeros((0, 1)), vec![], vec![]).unwrap();

        assert!(matches!(
            trainer.train(&mut line(8, 0.0), &empty, None),
            Err(MlErr::Configuration(_))
        ));
    }
}
