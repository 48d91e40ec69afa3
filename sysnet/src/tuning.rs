use std::fmt::Debug;

use log::debug;
use machine_learning::{
    dataset::Dataset,
    training::{LrSweep, TrainerBuilder},
};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    Result, SysnetErr,
    catalog::Catalog,
    config::SysnetConfig,
    linear::LinearRegression,
    partition::Partitioner,
    pipeline::Folds,
};

const L1_GRID_SIZE: usize = 10;
const RANGE_TEST_START_LR: f32 = 1e-7;
const RANGE_TEST_END_LR: f32 = 1.0;
const RANGE_TEST_STEPS: usize = 100;

/// The outcome of a hyper-parameter search.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningResult<T> {
    /// Every candidate with the best validation loss of its short run.
    pub candidates: Vec<(T, f32)>,
    pub best: T,
}

/// The outcome of a recursive feature elimination on one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureElimination {
    /// The validation loss of the linear model with every template.
    pub full_loss: f32,
    /// The templates in the order they were dropped, each with the validation loss of the
    /// linear model fitted without it and the ones dropped before.
    pub eliminated: Vec<(usize, f32)>,
    /// The subset with the lowest validation loss, in increasing order.
    pub axes_to_keep: Vec<usize>,
}

/// Returns the L1 penalties tried by `tune_l1`, log-spaced from 1e-6 to 1.
pub fn l1_grid() -> Vec<f32> {
    (0..L1_GRID_SIZE)
        .map(|i| 10f32.powf(-6.0 + 6.0 * i as f32 / (L1_GRID_SIZE - 1) as f32))
        .collect()
}

/// Picks the L1 penalty with the lowest validation loss after `tuning_epochs` epochs.
pub fn tune_l1(config: &SysnetConfig, catalog: &Catalog) -> Result<TuningResult<f32>> {
    tune(config, catalog, l1_grid(), |config, &alpha| {
        config.l1_alpha = alpha;
    })
}

/// Picks the hidden layer structure with the lowest validation loss after `tuning_epochs`
/// epochs.
///
/// # Arguments
/// * `structures` - The candidates, each one the widths of the hidden layers.
pub fn tune_structure(
    config: &SysnetConfig,
    catalog: &Catalog,
    structures: &[Vec<usize>],
) -> Result<TuningResult<Vec<usize>>> {
    tune(config, catalog, structures.to_vec(), |config, hidden| {
        config.hidden_layers = hidden.clone();
    })
}

/// Runs a learning rate range test on the training fold of the first partition.
pub fn find_lr(config: &SysnetConfig, catalog: &Catalog) -> Result<LrSweep> {
    let Folds { mut train, .. } = first_folds(config, catalog)?;
    let spec = config.trainer_spec(catalog.x_size(), config.seed)?;
    let mut trainer = TrainerBuilder::new().build(&spec)?;

    Ok(trainer.range_test(
        &mut train,
        RANGE_TEST_START_LR,
        RANGE_TEST_END_LR,
        RANGE_TEST_STEPS,
    )?)
}

/// Drops templates one at a time, each round the one whose removal hurts a linear model's
/// validation loss the least, until a single template is left.
///
/// # Arguments
/// * `train` - The fold the linear models are fitted on.
/// * `valid` - The fold they are scored on.
///
/// # Returns
/// The elimination order and the subset that scored best along the way.
pub fn eliminate_features(train: &Dataset, valid: &Dataset) -> Result<FeatureElimination> {
    let score = |axes: &[usize]| -> Result<f32> {
        let x = train.x().select(Axis(1), axes);
        let model = LinearRegression::fit(x.view(), first(train.y()), first(train.w()))?;

        let x = valid.x().select(Axis(1), axes);
        Ok(model.loss(x.view(), first(valid.y()), first(valid.w())))
    };

    let mut remaining: Vec<usize> = (0..train.x_size()).collect();
    let full_loss = score(&remaining)?;
    let mut best = (full_loss, remaining.clone());
    let mut eliminated = Vec::with_capacity(remaining.len());

    while remaining.len() > 1 {
        let losses = (0..remaining.len())
            .map(|pos| {
                let mut axes = remaining.clone();
                axes.remove(pos);
                score(&axes)
            })
            .collect::<Result<Vec<f32>>>()?;

        let Some((pos, &loss)) = losses.iter().enumerate().min_by(|(_, a), (_, b)| a.total_cmp(b))
        else {
            break;
        };

        let axis = remaining.remove(pos);
        debug!(axis = axis, val_loss = loss; "template eliminated");
        eliminated.push((axis, loss));

        if loss < best.0 {
            best = (loss, remaining.clone());
        }
    }

    Ok(FeatureElimination {
        full_loss,
        eliminated,
        axes_to_keep: best.1,
    })
}

/// The only column of a target or weight matrix.
fn first(column: ArrayView2<'_, f32>) -> ArrayView1<'_, f32> {
    column.index_axis_move(Axis(1), 0)
}

fn tune<T, F>(
    config: &SysnetConfig,
    catalog: &Catalog,
    candidates: Vec<T>,
    apply: F,
) -> Result<TuningResult<T>>
where
    T: Clone + Debug + Send + Sync,
    F: Fn(&mut SysnetConfig, &T) + Sync,
{
    if candidates.is_empty() {
        return Err(SysnetErr::config("nothing to tune, no candidates given"));
    }

    let folds = first_folds(config, catalog)?;

    let losses = candidates
        .par_iter()
        .map(|candidate| {
            let mut config = config.clone();
            apply(&mut config, candidate);
            short_run(&config, catalog, &folds)
        })
        .collect::<Result<Vec<f32>>>()?;

    for (candidate, loss) in candidates.iter().zip(&losses) {
        debug!(val_loss = *loss; "candidate {candidate:?}");
    }

    let best = losses
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| candidates[i].clone())
        .ok_or_else(|| SysnetErr::config("nothing to tune, no candidates given"))?;

    Ok(TuningResult {
        candidates: candidates.into_iter().zip(losses).collect(),
        best,
    })
}

fn first_folds(config: &SysnetConfig, catalog: &Catalog) -> Result<Folds> {
    let partitions = Partitioner::new(config.num_partitions, config.train_valid_ratio)?
        .split(catalog.len(), config.seed)?;

    let first = partitions
        .first()
        .ok_or_else(|| SysnetErr::config("the split produced no partitions"))?;

    Ok(Folds::new(catalog, first, config.feature_scaling)?)
}

/// Trains for exactly `tuning_epochs` epochs and returns the best validation loss.
fn short_run(config: &SysnetConfig, catalog: &Catalog, folds: &Folds) -> Result<f32> {
    let mut spec = config.trainer_spec(catalog.x_size(), config.seed)?;
    spec.max_epochs = config.tuning_epochs;
    spec.patience = config.tuning_epochs;

    let mut trainer = TrainerBuilder::new().build(&spec)?;
    let mut train = folds.train.clone();
    let outcome = trainer.train(&mut train, &folds.valid, None)?;

    Ok(outcome.best_val_loss())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Sample;

    fn catalog() -> Catalog {
        let samples = (0..80)
            .map(|i| {
                let t = (i % 8) as f32 / 8.0;
                Sample {
                    id: i as u64,
                    features: vec![t, (i % 3) as f32],
                    count: 30.0 * (1.0 + 0.4 * t),
                    weight: 1.0,
                }
            })
            .collect();

        Catalog::new(samples).unwrap()
    }

    fn config() -> SysnetConfig {
        SysnetConfig {
            hidden_layers: vec![4],
            batch_size: 16,
            tuning_epochs: 3,
            cycle_length_steps: 8,
            ..Default::default()
        }
    }

    #[test]
    fn l1_grid_is_log_spaced() {
        let grid = l1_grid();

        assert_eq!(grid.len(), 10);
        assert!((grid[0] - 1e-6).abs() < 1e-9);
        assert!((grid[9] - 1.0).abs() < 1e-5);
        assert!(grid.windows(2).all(|w| (w[1] / w[0] - 10f32.powf(6.0 / 9.0)).abs() < 1e-3));
    }

    #[test]
    fn tune_l1_picks_the_lowest_loss() {
        let result = tune_l1(&config(), &catalog()).unwrap();

        assert_eq!(result.candidates.len(), 10);
        let min = result
            .candidates
            .iter()
            .map(|(_, loss)| *loss)
            .fold(f32::INFINITY, f32::min);
        let (_, best_loss) = result
            .candidates
            .iter()
            .find(|(alpha, _)| *alpha == result.best)
            .unwrap();

        assert_eq!(*best_loss, min);
    }

    #[test]
    fn tune_structure_picks_one_of_the_candidates() {
        let structures = vec![vec![2], vec![6, 3]];
        let result = tune_structure(&config(), &catalog(), &structures).unwrap();

        assert!(structures.contains(&result.best));
        assert_eq!(result.candidates.len(), 2);
    }

    #[test]
    fn no_candidates_is_a_configuration_error() {
        assert!(matches!(
            tune_structure(&config(), &catalog(), &[]),
            Err(SysnetErr::Configuration(_))
        ));
    }

    #[test]
    fn find_lr_sweeps_upwards() {
        let sweep = find_lr(&config(), &catalog()).unwrap();

        assert!(!sweep.probes().is_empty());
        assert!(sweep.probes().windows(2).all(|w| w[0].lr < w[1].lr));
    }

    fn templates(rows: std::ops::Range<usize>) -> Dataset {
        let n = rows.len();
        let mut x = Vec::with_capacity(3 * n);
        let mut y = Vec::with_capacity(n);

        for i in rows {
            let informative = i as f32 / 60.0;
            let noise = ((i * 3) % 7) as f32 / 7.0 - 0.5;
            x.extend([informative, ((i * 7) % 11) as f32 / 11.0, ((i * 5) % 13) as f32 / 13.0]);
            y.push(1.0 + 0.5 * informative + 0.05 * noise);
        }

        let x = ndarray::Array2::from_shape_vec((n, 3), x).unwrap();
        Dataset::new(x, y, vec![1.0; n]).unwrap()
    }

    #[test]
    fn elimination_keeps_the_informative_template() {
        let result = eliminate_features(&templates(0..40), &templates(40..60)).unwrap();

        assert_eq!(result.eliminated.len(), 2);
        assert!(result.eliminated.iter().all(|&(axis, _)| axis != 0));
        assert!(result.axes_to_keep.contains(&0));
        assert!(result.full_loss.is_finite());

        let best = result
            .eliminated
            .iter()
            .map(|&(_, loss)| loss)
            .fold(result.full_loss, f32::min);
        let (x, y, w) = {
            let valid = templates(40..60);
            (
                valid.x().select(Axis(1), &result.axes_to_keep),
                valid.y().column(0).to_owned(),
                valid.w().column(0).to_owned(),
            )
        };
        let train = templates(0..40);
        let model = LinearRegression::fit(
            train.x().select(Axis(1), &result.axes_to_keep).view(),
            train.y().column(0),
            train.w().column(0),
        )
        .unwrap();

        assert_eq!(model.loss(x.view(), y.view(), w.view()), best);
    }
}
