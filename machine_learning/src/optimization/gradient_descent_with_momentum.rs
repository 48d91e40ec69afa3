use super::{Optimizer, check_sizes};
use crate::Result;

#[derive(Debug, Clone)]
pub struct GradientDescentWithMomentum {
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `momentum` - How much of the previous velocity survives each update.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(len: usize, momentum: f32) -> Self {
        Self {
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32], learning_rate: f32) -> Result<()> {
        check_sizes(params, grad, self.velocity.len())?;

        let lr = learning_rate;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });

        Ok(())
    }

    fn set_momentum(&mut self, momentum: f32) {
        self.momentum = momentum;
    }

    fn reset(&mut self) {
        self.velocity.fill(0.);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 0.5);
        let mut params = [0.0];

        optimizer.update_params(&mut params, &[1.0], 0.1).unwrap();
        assert!((params[0] + 0.1).abs() < 1e-6);

        // v = 0.5 * 1 + 1
        optimizer.update_params(&mut params, &[1.0], 0.1).unwrap();
        assert!((params[0] + 0.25).abs() < 1e-6);

        optimizer.reset();
        optimizer.update_params(&mut params, &[1.0], 0.1).unwrap();
        assert!((params[0] + 0.35).abs() < 1e-6);
    }
}
