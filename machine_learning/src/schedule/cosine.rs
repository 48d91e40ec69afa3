use std::f64::consts::PI;

use super::Schedule;
use crate::{MlErr, Result};

/// Cosine annealing with warm restarts.
///
/// The rate follows half a cosine from `max_lr` down to `min_lr` over `first_period` steps, then
/// restarts at `max_lr` with a period `period_mult` times longer.
#[derive(Debug, Clone)]
pub struct CosineWarmRestarts {
    max_lr: f32,
    min_lr: f32,
    first_period: usize,
    period_mult: usize,
}

impl CosineWarmRestarts {
    /// Creates a new `CosineWarmRestarts`.
    ///
    /// # Returns
    /// A configuration error unless `0 <= min_lr <= max_lr`, `first_period > 0` and
    /// `period_mult > 0`.
    pub fn new(max_lr: f32, min_lr: f32, first_period: usize, period_mult: usize) -> Result<Self> {
        if !(min_lr >= 0. && min_lr <= max_lr && max_lr.is_finite()) {
            return Err(MlErr::config(format!(
                "cosine annealing needs 0 <= min_lr <= max_lr, got {min_lr} and {max_lr}"
            )));
        }

        if first_period == 0 || period_mult == 0 {
            return Err(MlErr::config(
                "cosine annealing periods and their multiplier must be positive",
            ));
        }

        Ok(Self {
            max_lr,
            min_lr,
            first_period,
            period_mult,
        })
    }

    /// Returns how many steps into the current period `step` is and the length of that period.
    fn position(&self, step: usize) -> (usize, usize) {
        if self.period_mult == 1 {
            return (step % self.first_period, self.first_period);
        }

        let mut t = step;
        let mut period = self.first_period;

        while t >= period {
            t -= period;
            period = period.saturating_mul(self.period_mult);
        }

        (t, period)
    }
}

impl Schedule for CosineWarmRestarts {
    fn rate(&self, step: usize) -> f32 {
        let (t, period) = self.position(step);
        let (max, min) = (self.max_lr as f64, self.min_lr as f64);

        (min + (max - min) * (1. + (PI * t as f64 / period as f64).cos()) / 2.) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restarts_with_longer_periods() {
        let schedule = CosineWarmRestarts::new(1e-2, 1e-5, 10, 2).unwrap();

        assert!((schedule.rate(0) - 1e-2).abs() < 1e-8);
        assert!(schedule.rate(9) < schedule.rate(5));
        assert!((schedule.rate(10) - 1e-2).abs() < 1e-8);
        // the second period lasts 20 steps
        assert!((schedule.rate(20) - (1e-2 + 1e-5) / 2.).abs() < 1e-6);
        assert!((schedule.rate(30) - 1e-2).abs() < 1e-8);
    }

    #[test]
    fn constant_period() {
        let schedule = CosineWarmRestarts::new(1.0, 0.0, 4, 1).unwrap();
        assert_eq!(schedule.rate(1), schedule.rate(5));
        assert!((schedule.rate(2) - 0.5).abs() < 1e-6);
    }
}
