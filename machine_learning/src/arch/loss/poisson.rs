use ndarray::{Array2, ArrayView2};

use super::{
    LossFn,
    loss_fn::{check_shapes, weighted_mean, weighted_prime},
};
use crate::{MlErr, Result};

/// Poisson negative log-likelihood, up to the terms that don't depend on the prediction.
///
/// The predictions must be strictly positive, pair this loss with a model whose output goes
/// through a positive activation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoissonNll;

impl PoissonNll {
    /// Returns a new `PoissonNll`.
    pub fn new() -> Self {
        Self
    }

    fn check_domain(y_pred: &ArrayView2<f32>) -> Result<()> {
        match y_pred.iter().position(|&p| !(p > 0.0)) {
            Some(index) => Err(MlErr::Domain {
                what: "poisson prediction",
                index,
                value: y_pred.iter().nth(index).copied().unwrap_or(f32::NAN),
            }),
            None => Ok(()),
        }
    }
}

impl LossFn for PoissonNll {
    fn loss(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        w: Option<ArrayView2<f32>>,
    ) -> Result<f32> {
        check_shapes(&y_pred, &y, w.as_ref())?;
        Self::check_domain(&y_pred)?;
        Ok(weighted_mean(&y_pred, &y, w.as_ref(), |p, t| p - t * p.ln()))
    }

    fn loss_prime(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        w: Option<ArrayView2<f32>>,
    ) -> Result<Array2<f32>> {
        check_shapes(&y_pred, &y, w.as_ref())?;
        Self::check_domain(&y_pred)?;
        Ok(weighted_prime(&y_pred, &y, w.as_ref(), |p, t| 1.0 - t / p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn non_positive_predictions_are_a_domain_error() {
        let p = array![[1.0], [0.0], [2.0]];
        let t = array![[1.0], [1.0], [1.0]];

        let err = PoissonNll.loss(p.view(), t.view(), None).unwrap_err();
        assert_eq!(
            err,
            MlErr::Domain {
                what: "poisson prediction",
                index: 1,
                value: 0.0
            }
        );
        assert!(PoissonNll.loss_prime(p.view(), t.view(), None).is_err());
    }

    #[test]
    fn loss_is_minimized_at_the_target() {
        let t = array![[2.0]];
        let at = PoissonNll.loss(array![[2.0]].view(), t.view(), None).unwrap();
        let below = PoissonNll.loss(array![[1.5]].view(), t.view(), None).unwrap();
        let above = PoissonNll.loss(array![[2.5]].view(), t.view(), None).unwrap();

        assert!(at < below);
        assert!(at < above);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 8;
        let p: Array2<f32> = Array2::from_shape_fn((n, 1), |_| rng.random_range(0.5..3.0));
        let t: Array2<f32> = Array2::from_shape_fn((n, 1), |_| rng.random_range(0.0..4.0));
        let w: Array2<f32> = Array2::from_shape_fn((n, 1), |_| rng.random_range(0.1..1.0));

        let grad = PoissonNll
            .loss_prime(p.view(), t.view(), Some(w.view()))
            .unwrap();
        let h = 1e-2;

        for i in 0..n {
            let mut up = p.clone();
            let mut down = p.clone();
            up[[i, 0]] += h;
            down[[i, 0]] -= h;

            let l_up = PoissonNll.loss(up.view(), t.view(), Some(w.view())).unwrap();
            let l_down = PoissonNll
                .loss(down.view(), t.view(), Some(w.view()))
                .unwrap();
            let numeric = (l_up - l_down) / (2.0 * h);

            assert!(
                (numeric - grad[[i, 0]]).abs() < 1e-3,
                "sample {i}: numeric {numeric}, analytic {}",
                grad[[i, 0]]
            );
        }
    }
}
