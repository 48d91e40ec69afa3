use super::{Optimizer, check_sizes};
use crate::Result;

/// Adaptive moment estimation.
///
/// Keeps bias corrected exponential moving averages of the gradient (`m`) and of its square
/// (`v`), each parameter moves `lr * m_hat / (sqrt(v_hat) + epsilon)`.
#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    m: Box<[f32]>,
    v: Box<[f32]>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `beta1`, `beta2` - The decay rates of the first and second moment estimates.
    /// * `epsilon` - Stabilizes the denominator.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            m: vec![0.; len].into_boxed_slice(),
            v: vec![0.; len].into_boxed_slice(),
        }
    }

    /// Returns the amount of parameters this instance holds state for.
    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32], learning_rate: f32) -> Result<()> {
        check_sizes(params, grad, self.m.len())?;

        let Self {
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
            .for_each(|(((p, g), m), v)| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g.powi(2);

                let m_hat = *m / bc1;
                let v_hat = *v / bc2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + eps);
            });

        Ok(())
    }

    fn set_momentum(&mut self, momentum: f32) {
        self.beta1 = momentum;
    }

    fn reset(&mut self) {
        self.beta1_t = 1.;
        self.beta2_t = 1.;
        self.m.fill(0.);
        self.v.fill(0.);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MlErr;

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut optimizer = Adam::new(2, 0.9, 0.999, 1e-8);
        let mut params = [1.0, 1.0];

        optimizer.update_params(&mut params, &[0.5, -3.0], 0.01).unwrap();

        assert!((params[0] - 0.99).abs() < 1e-5);
        assert!((params[1] - 1.01).abs() < 1e-5);
    }

    #[test]
    fn identical_state_gives_identical_updates() {
        let mut a = Adam::new(2, 0.9, 0.999, 1e-8);
        let mut b = a.clone();
        let mut pa = [0.3, -0.2];
        let mut pb = pa;

        for step in 0..5 {
            let grad = [step as f32 * 0.1, 1.0 - step as f32];
            a.update_params(&mut pa, &grad, 0.01).unwrap();
            b.update_params(&mut pb, &grad, 0.01).unwrap();
        }

        assert_eq!(pa, pb);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let mut optimizer = Adam::new(2, 0.9, 0.999, 1e-8);
        let mut params = [1.0, 1.0, 1.0];
        assert!(matches!(
            optimizer.update_params(&mut params, &[0.0; 3], 0.1),
            Err(MlErr::SizeMismatch { what: "optimizer state", .. })
        ));
    }
}
