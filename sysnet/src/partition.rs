use std::ops::Range;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{Result, SysnetErr};

/// The train, validation and test folds of one partition, as indices into the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub index: usize,
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits a catalog into k folds, each of them the test set of one partition.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    num_partitions: usize,
    train_valid_ratio: f32,
}

impl Partitioner {
    /// Creates a new `Partitioner`.
    ///
    /// # Arguments
    /// * `num_partitions` - The amount of folds, at least 2.
    /// * `train_valid_ratio` - The fraction of the non-test samples used for training, the rest
    ///   is used for validation.
    pub fn new(num_partitions: usize, train_valid_ratio: f32) -> Result<Self> {
        if num_partitions <= 1 {
            return Err(SysnetErr::config(format!(
                "num_partitions must be at least 2, got {num_partitions}"
            )));
        }

        if !(train_valid_ratio > 0.0 && train_valid_ratio < 1.0) {
            return Err(SysnetErr::config(format!(
                "train_valid_ratio must be in (0, 1), got {train_valid_ratio}"
            )));
        }

        Ok(Self {
            num_partitions,
            train_valid_ratio,
        })
    }

    /// Splits `n` samples into partitions.
    ///
    /// The samples are shuffled once with `seed` and cut into `num_partitions` contiguous folds
    /// whose sizes differ by at most one. Partition `k` tests on fold `k` and splits the others
    /// into train and validation following `train_valid_ratio`.
    ///
    /// # Returns
    /// The partitions, sorted by index, or a configuration error if there are too few samples.
    pub fn split(&self, n: usize, seed: u64) -> Result<Vec<Partition>> {
        let k = self.num_partitions;

        if n < k {
            return Err(SysnetErr::config(format!(
                "can't split {n} samples into {k} partitions"
            )));
        }

        if n - fold_range(n, k, 0).len() < 2 {
            return Err(SysnetErr::config(format!(
                "{n} samples leave no room for both a training and a validation fold"
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let partitions = (0..k)
            .map(|index| {
                let range = fold_range(n, k, index);
                let mut test = order[range.clone()].to_vec();
                let rest: Vec<usize> = order[..range.start]
                    .iter()
                    .chain(&order[range.end..])
                    .copied()
                    .collect();

                let n_train = (self.train_valid_ratio * rest.len() as f32).round() as usize;
                let n_train = n_train.clamp(1, rest.len() - 1);

                let mut train = rest[..n_train].to_vec();
                let mut valid = rest[n_train..].to_vec();

                train.sort_unstable();
                valid.sort_unstable();
                test.sort_unstable();

                Partition {
                    index,
                    train,
                    valid,
                    test,
                }
            })
            .collect();

        Ok(partitions)
    }
}

/// Returns the range of fold `i` when splitting `n` items into `k` balanced folds, the first
/// `n % k` folds take one extra item.
fn fold_range(n: usize, k: usize, i: usize) -> Range<usize> {
    let base = n / k;
    let extra = n % k;
    let start = i * base + i.min(extra);
    let len = base + usize::from(i < extra);

    start..start + len
}
