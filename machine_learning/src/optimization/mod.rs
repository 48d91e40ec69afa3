mod adam;
mod adamw;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;

pub use adam::Adam;
pub use adamw::AdamW;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::Optimizer;

use crate::{MlErr, Result};

fn check_sizes(params: &[f32], grad: &[f32], state: usize) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    if state != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "optimizer state",
            got: state,
            expected: params.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{CyclicLr, Schedule};

    const TARGET: [f32; 3] = [1.0, -2.0, 0.5];

    fn quadratic(params: &[f32]) -> (f32, Vec<f32>) {
        let loss = params.iter().zip(TARGET).map(|(p, t)| (p - t).powi(2)).sum();
        let grad = params.iter().zip(TARGET).map(|(p, t)| 2.0 * (p - t)).collect();
        (loss, grad)
    }

    fn minimize<O: Optimizer, S: Schedule>(optimizer: &mut O, schedule: &S, steps: usize) -> Vec<f32> {
        let mut params = vec![3.0, 3.0, -3.0];
        let (initial, _) = quadratic(&params);
        let mut checkpoints = vec![initial];

        for step in 0..steps {
            if let Some(momentum) = schedule.momentum(step) {
                optimizer.set_momentum(momentum);
            }

            let (loss, grad) = quadratic(&params);
            optimizer
                .update_params(&mut params, &grad, schedule.rate(step))
                .unwrap();

            if (step + 1) % (steps / 4) == 0 {
                checkpoints.push(loss);
            }
        }

        // the loss keeps going down between checkpoints, up to round-off near the minimum
        for pair in checkpoints.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-4, "loss went up: {checkpoints:?}");
        }
        assert!(checkpoints[checkpoints.len() - 1] < checkpoints[0] * 1e-3);

        params
    }

    fn assert_converged(params: &[f32]) {
        for (p, t) in params.iter().zip(TARGET) {
            assert!((p - t).abs() < 1e-2, "{params:?} didn't reach {TARGET:?}");
        }
    }

    fn one_cycle() -> CyclicLr {
        CyclicLr::new(1e-3, 0.1, 1000)
            .unwrap()
            .with_num_cycles(1)
    }

    #[test]
    fn gradient_descent_converges() {
        let mut optimizer = GradientDescent::new();
        assert_converged(&minimize(&mut optimizer, &one_cycle(), 3000));
    }

    #[test]
    fn gradient_descent_with_momentum_converges() {
        let mut optimizer = GradientDescentWithMomentum::new(3, 0.9);
        let schedule = one_cycle().with_momentum(0.85, 0.95).unwrap();
        assert_converged(&minimize(&mut optimizer, &schedule, 3000));
    }

    #[test]
    fn adam_converges() {
        let mut optimizer = Adam::new(3, 0.9, 0.999, 1e-8);
        assert_converged(&minimize(&mut optimizer, &one_cycle(), 3000));
    }

    #[test]
    fn adamw_converges() {
        let mut optimizer = AdamW::new(3, 0.9, 0.999, 1e-8, 1e-4);
        assert_converged(&minimize(&mut optimizer, &one_cycle(), 3000));
    }
}
