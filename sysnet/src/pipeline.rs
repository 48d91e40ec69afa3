use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{info, warn};
use machine_learning::{
    MlErr,
    arch::ModelState,
    dataset::Dataset,
    specs::{ModelSpec, TrainerSpec},
    training::{LossHistory, StopReason, TrainerBuilder},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    Result, SysnetErr,
    catalog::Catalog,
    config::SysnetConfig,
    ensemble::{Ensembler, WeightMap},
    partition::{Partition, Partitioner},
    scaling::{FeatureScaling, Scaler},
    tuning::{self, FeatureElimination},
};

/// What to do when a single run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first failed run fails the whole pipeline.
    #[default]
    Abort,
    /// Failed runs are dropped and the ensemble is built from the rest.
    Degrade,
}

/// The predicted response of one sample by one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    pub prediction: f32,
    pub partition: usize,
    pub seed: u64,
}

/// The metrics of one successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub partition: usize,
    pub seed: u64,
    /// The templates the run was trained on.
    pub axes: Vec<usize>,
    pub epochs_run: usize,
    pub steps: usize,
    pub stop_reason: StopReason,
    pub best_epoch: usize,
    pub min_train_loss: f32,
    pub best_val_loss: f32,
    pub test_loss: f32,
    pub history: LossHistory,
}

/// A run that didn't make it into the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub partition: usize,
    pub seed: u64,
    pub error: String,
}

/// The best model of one run, with the scaling its inputs need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub partition: usize,
    pub seed: u64,
    pub axes: Vec<usize>,
    pub scaler: Scaler,
    pub state: ModelState,
}

/// Everything the runs of a pipeline produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub predictions: Vec<PredictionRecord>,
    pub reports: Vec<RunReport>,
    pub failures: Vec<RunFailure>,
    /// One per partition, in partition order, when feature elimination is enabled.
    pub eliminations: Vec<FeatureElimination>,
    #[serde(skip)]
    pub checkpoints: Vec<RunCheckpoint>,
}

/// The training, validation and test datasets of one partition.
pub(crate) struct Folds {
    pub train: Dataset,
    pub valid: Dataset,
    pub test: Dataset,
    pub scaler: Scaler,
}

impl Folds {
    /// Builds the datasets of `partition`, with the templates scaled by statistics fitted on
    /// its training fold only.
    pub fn new(
        catalog: &Catalog,
        partition: &Partition,
        scaling: FeatureScaling,
    ) -> machine_learning::Result<Self> {
        let scaler = Scaler::fit(scaling, catalog.features(&partition.train).view());

        Ok(Self {
            train: catalog.dataset(&partition.train, &scaler)?,
            valid: catalog.dataset(&partition.valid, &scaler)?,
            test: catalog.dataset(&partition.test, &scaler)?,
            scaler,
        })
    }

    /// Keeps only the given templates, in the given order.
    pub fn select(self, axes: &[usize]) -> machine_learning::Result<Self> {
        Ok(Self {
            train: self.train.select_features(axes)?,
            valid: self.valid.select_features(axes)?,
            test: self.test.select_features(axes)?,
            scaler: self.scaler.select(axes),
        })
    }
}

struct RunResult {
    predictions: Vec<PredictionRecord>,
    report: RunReport,
    checkpoint: RunCheckpoint,
}

/// Trains every (partition, seed) pair in parallel and ensembles their test predictions.
pub struct Pipeline {
    config: SysnetConfig,
    builder: TrainerBuilder,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Creates a new `Pipeline`.
    ///
    /// # Returns
    /// A configuration error if the config is invalid.
    pub fn new(config: SysnetConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            builder: TrainerBuilder::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SysnetConfig {
        &self.config
    }

    /// Returns a flag that, once set, cancels every run at its next epoch boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Runs the enabled hyper-parameter searches and keeps their winners in the config.
    ///
    /// The structure is searched first, then the L1 penalty, then the learning rate.
    pub fn tune(&mut self, catalog: &Catalog) -> Result<()> {
        if !self.config.find_structure.is_empty() {
            let structures = self.config.find_structure.clone();
            let result = tuning::tune_structure(&self.config, catalog, &structures)?;
            info!("best structure {:?}", result.best);
            self.config.hidden_layers = result.best;
        }

        if self.config.find_l1 {
            let result = tuning::tune_l1(&self.config, catalog)?;
            info!("best l1_alpha {}", result.best);
            self.config.l1_alpha = result.best;
        }

        if self.config.find_lr {
            let sweep = tuning::find_lr(&self.config, catalog)?;

            match sweep.suggestion() {
                Some(lr) => {
                    info!("range test suggests max_lr {lr}");
                    self.config.max_lr = lr;
                    self.config.base_lr = self.config.base_lr.min(lr / 10.0);
                }
                None => warn!("the range test didn't find a descending region, keeping max_lr"),
            }
        }

        self.config.validate()
    }

    /// Trains every run and collects their test predictions.
    ///
    /// Under `FailurePolicy::Abort` the first failure raises the cancel flag, so the runs still
    /// going stop at their next epoch boundary and the pipeline stays cancelled.
    ///
    /// # Returns
    /// The predictions and metrics of the successful runs. Under `FailurePolicy::Abort` the first
    /// failed run (in partition, seed order) that wasn't cancelled because of another one is
    /// returned as `PartitionFailed` instead.
    pub fn run(&self, catalog: &Catalog) -> Result<PipelineOutput> {
        let config = &self.config;
        let spec = config.trainer_spec(catalog.x_size(), config.seed)?;

        // Surfaces configuration errors before any training starts.
        self.builder.build(&spec)?;

        let partitions = Partitioner::new(config.num_partitions, config.train_valid_ratio)?
            .split(catalog.len(), config.seed)?;

        let eliminations = if config.eliminate_features {
            partitions
                .par_iter()
                .map(|p| self.eliminate_features(catalog, p))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![]
        };

        let all_axes: Vec<usize> = (0..catalog.x_size()).collect();
        let axes_of = |p: &Partition| {
            eliminations
                .get(p.index)
                .map_or(all_axes.as_slice(), |e| e.axes_to_keep.as_slice())
        };

        let jobs: Vec<(&Partition, &[usize], u64)> = partitions
            .iter()
            .flat_map(|p| {
                let axes = axes_of(p);
                (0..config.num_seeds_per_partition)
                    .map(move |s| (p, axes, self.run_seed(p.index, s)))
            })
            .collect();

        info!(
            samples = catalog.len(),
            partitions = partitions.len(),
            runs = jobs.len();
            "starting the runs"
        );

        let cancelled_by_user = self.cancel.load(Ordering::Relaxed);

        let results: Vec<_> = jobs
            .par_iter()
            .map(|&(partition, axes, seed)| {
                let result = self.run_one(catalog, &spec, partition, axes, seed);

                if result.is_err() && config.failure_policy == FailurePolicy::Abort {
                    self.cancel.store(true, Ordering::Relaxed);
                }

                (partition.index, seed, result)
            })
            .collect();

        if config.failure_policy == FailurePolicy::Abort {
            if let Some(err) = abort_error(&results, cancelled_by_user) {
                return Err(err);
            }
        }

        let mut output = PipelineOutput {
            eliminations,
            ..Default::default()
        };

        for (partition, seed, result) in results {
            match result {
                Ok(run) => {
                    output.predictions.extend(run.predictions);
                    output.reports.push(run.report);
                    output.checkpoints.push(run.checkpoint);
                }
                Err(source) => {
                    warn!(partition = partition, seed = seed; "dropping failed run: {source}");
                    output.failures.push(RunFailure {
                        partition,
                        seed,
                        error: source.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = output.reports.len(),
            failed = output.failures.len();
            "runs finished"
        );

        Ok(output)
    }

    /// Ensembles the predictions of `output` into the weight map of the catalog.
    pub fn ensemble(&self, catalog: &Catalog, output: &PipelineOutput) -> Result<WeightMap> {
        Ensembler::new(self.config.normalization_convention)
            .combine(&catalog.ids(), &output.predictions)
    }

    /// Trains, then ensembles.
    pub fn run_and_ensemble(&self, catalog: &Catalog) -> Result<(PipelineOutput, WeightMap)> {
        let output = self.run(catalog)?;
        let map = self.ensemble(catalog, &output)?;
        Ok((output, map))
    }

    fn run_seed(&self, partition: usize, s: usize) -> u64 {
        let n = self.config.num_seeds_per_partition;
        self.config
            .seed
            .wrapping_add(1 + (partition * n + s) as u64)
    }

    /// Runs the recursive feature elimination of `partition` on its scaled folds.
    fn eliminate_features(
        &self,
        catalog: &Catalog,
        partition: &Partition,
    ) -> Result<FeatureElimination> {
        let folds = Folds::new(catalog, partition, self.config.feature_scaling)?;
        let elimination = tuning::eliminate_features(&folds.train, &folds.valid)?;

        info!(
            partition = partition.index,
            full_loss = elimination.full_loss;
            "keeping templates {:?}",
            elimination.axes_to_keep
        );

        Ok(elimination)
    }

    fn run_one(
        &self,
        catalog: &Catalog,
        spec: &TrainerSpec,
        partition: &Partition,
        axes: &[usize],
        seed: u64,
    ) -> machine_learning::Result<RunResult> {
        let config = &self.config;

        if self.cancel.load(Ordering::Relaxed) {
            return Err(MlErr::Cancelled { epoch: 0 });
        }

        let Folds {
            mut train,
            valid,
            test,
            scaler,
        } = Folds::new(catalog, partition, config.feature_scaling)?.select(axes)?;

        let spec = TrainerSpec {
            model: ModelSpec {
                x_size: axes.len(),
                ..spec.model.clone()
            },
            seed,
            ..spec.clone()
        };
        let mut trainer = self.builder.build(&spec)?;

        let outcome = trainer.train(&mut train, &valid, Some(&self.cancel))?;
        let state = &outcome.best.state;

        let test_loss = trainer.evaluate(state, &test)?;
        let y_pred = trainer.predict(state, test.x())?;

        let samples = catalog.samples();
        let predictions = partition
            .test
            .iter()
            .zip(y_pred.iter())
            .map(|(&i, &prediction)| PredictionRecord {
                id: samples[i].id,
                prediction,
                partition: partition.index,
                seed,
            })
            .collect();

        info!(
            partition = partition.index,
            seed = seed,
            epochs = outcome.epochs_run,
            best_val_loss = outcome.best_val_loss(),
            test_loss = test_loss;
            "run finished"
        );

        let report = RunReport {
            partition: partition.index,
            seed,
            axes: axes.to_vec(),
            epochs_run: outcome.epochs_run,
            steps: outcome.steps,
            stop_reason: outcome.stop_reason,
            best_epoch: outcome.best.epoch,
            min_train_loss: outcome.min_train_loss(),
            best_val_loss: outcome.best_val_loss(),
            test_loss,
            history: outcome.history.clone(),
        };

        let checkpoint = RunCheckpoint {
            partition: partition.index,
            seed,
            axes: axes.to_vec(),
            scaler,
            state: outcome.best.state,
        };

        Ok(RunResult {
            predictions,
            report,
            checkpoint,
        })
    }
}

/// Picks the error a failed pipeline reports: the first real failure, skipping the runs that
/// were only cancelled because of it. A pipeline cancelled from outside reports its first run.
fn abort_error(
    results: &[(usize, u64, machine_learning::Result<RunResult>)],
    cancelled_by_user: bool,
) -> Option<SysnetErr> {
    let failures: Vec<_> = results
        .iter()
        .filter_map(|(partition, seed, result)| Some((*partition, *seed, result.as_ref().err()?)))
        .collect();

    let &(partition, seed, source) = failures
        .iter()
        .find(|(_, _, e)| cancelled_by_user || !matches!(e, MlErr::Cancelled { .. }))
        .or(failures.first())?;

    Some(SysnetErr::PartitionFailed {
        partition,
        seed,
        source: source.clone(),
    })
}
