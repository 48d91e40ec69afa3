use std::num::NonZeroUsize;

use ndarray::{Array2, ArrayView2, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// An in-memory design matrix: one row of features, one target and one cost weight per sample.
///
/// The rows are never moved, shuffling only permutes the order in which batches visit them.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array2<f32>,
    w: Array2<f32>,
    order: Vec<usize>,
}

/// An owned mini-batch gathered from a `Dataset`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
    pub w: Array2<f32>,
}

impl Batch {
    /// Returns the amount of samples in this batch.
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The features, one row per sample.
    /// * `y` - The targets.
    /// * `w` - The per-sample cost weights.
    ///
    /// # Returns
    /// A new `Dataset` or a size mismatch error if the three don't describe the same samples.
    pub fn new(x: Array2<f32>, y: Vec<f32>, w: Vec<f32>) -> Result<Self> {
        let n = x.nrows();

        if y.len() != n {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: y.len(),
                expected: n,
            });
        }

        if w.len() != n {
            return Err(MlErr::SizeMismatch {
                what: "weights",
                got: w.len(),
                expected: n,
            });
        }

        let y = Array2::from_shape_vec((n, 1), y).map_err(|_| MlErr::SizeMismatch {
            what: "targets",
            got: 0,
            expected: n,
        })?;
        let w = Array2::from_shape_vec((n, 1), w).map_err(|_| MlErr::SizeMismatch {
            what: "weights",
            got: 0,
            expected: n,
        })?;

        Ok(Self {
            x,
            y,
            w,
            order: (0..n).collect(),
        })
    }

    /// Returns the amount of samples.
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    /// Returns the dimensionality of the feature vectors.
    pub fn x_size(&self) -> usize {
        self.x.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    pub fn w(&self) -> ArrayView2<'_, f32> {
        self.w.view()
    }

    /// Permutes the visiting order of the samples.
    ///
    /// # Arguments
    /// * `rng` - The random number generator driving the permutation.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    /// Keeps only the given feature columns, in the given order.
    ///
    /// # Returns
    /// The narrowed dataset or a configuration error if a column doesn't exist.
    pub fn select_features(&self, columns: &[usize]) -> Result<Self> {
        if let Some(col) = columns.iter().find(|&&col| col >= self.x_size()) {
            return Err(MlErr::config(format!(
                "feature {col} doesn't exist, the dataset has {}",
                self.x_size()
            )));
        }

        Ok(Self {
            x: self.x.select(Axis(1), columns),
            y: self.y.clone(),
            w: self.w.clone(),
            order: self.order.clone(),
        })
    }

    /// Iterates the dataset in mini-batches following the current visiting order.
    ///
    /// # Arguments
    /// * `batch_size` - The maximum amount of samples per batch, the last one may be smaller.
    pub fn batches(&self, batch_size: NonZeroUsize) -> impl Iterator<Item = Batch> + '_ {
        self.order.chunks(batch_size.get()).map(|idx| Batch {
            x: self.x.select(Axis(0), idx),
            y: self.y.select(Axis(0), idx),
            w: self.w.select(Axis(0), idx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    fn dataset() -> Dataset {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        Dataset::new(x, vec![10., 11., 12., 13., 14.], vec![1.; 5]).unwrap()
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let x = array![[0.0], [1.0]];
        assert!(matches!(
            Dataset::new(x, vec![1.0], vec![1.0, 1.0]),
            Err(MlErr::SizeMismatch { what: "targets", .. })
        ));
    }

    #[test]
    fn batches_cover_every_row_once() {
        let ds = dataset();
        let batches: Vec<_> = ds.batches(NonZeroUsize::new(2).unwrap()).collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 1);

        let ys: Vec<f32> = batches.iter().flat_map(|b| b.y.iter().copied()).collect();
        assert_eq!(ys, [10., 11., 12., 13., 14.]);
    }

    #[test]
    fn shuffle_keeps_rows_aligned_and_is_reproducible() {
        let mut a = dataset();
        let mut b = dataset();
        a.shuffle(&mut StdRng::seed_from_u64(7));
        b.shuffle(&mut StdRng::seed_from_u64(7));

        let size = NonZeroUsize::new(5).unwrap();
        let batch_a = a.batches(size).next().unwrap();
        let batch_b = b.batches(size).next().unwrap();

        assert_eq!(batch_a.x, batch_b.x);
        for (x, y) in batch_a.x.iter().zip(batch_a.y.iter()) {
            assert_eq!(*y, x + 10.0);
        }
    }

    #[test]
    fn selecting_features_keeps_the_targets() {
        let x = array![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]];
        let ds = Dataset::new(x, vec![1.0, 2.0], vec![1.0, 0.5]).unwrap();

        let narrow = ds.select_features(&[2, 0]).unwrap();
        assert_eq!(narrow.x(), array![[2.0, 0.0], [5.0, 3.0]]);
        assert_eq!(narrow.y(), ds.y());
        assert_eq!(narrow.w(), ds.w());

        assert!(matches!(
            ds.select_features(&[3]),
            Err(MlErr::Configuration(_))
        ));
    }
}
