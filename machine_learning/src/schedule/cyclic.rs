use super::Schedule;
use crate::{MlErr, Result};

/// Triangular cyclic learning rate.
///
/// Within each cycle the rate climbs linearly from `base_lr` to the cycle's peak during the first
/// half and comes back down during the second one. The peak of cycle `c` is
/// `base_lr + (max_lr - base_lr) * decay^c`. Once `num_cycles` cycles are over the rate stays at
/// `base_lr`.
///
/// When a momentum range is set, the momentum goes the opposite way: it's at its maximum when the
/// rate is at `base_lr` and at its minimum on the peaks.
#[derive(Debug, Clone)]
pub struct CyclicLr {
    base_lr: f32,
    max_lr: f32,
    cycle_len: usize,
    num_cycles: Option<usize>,
    decay: f32,
    momentum: Option<(f32, f32)>,
}

impl CyclicLr {
    /// Creates a new `CyclicLr` that cycles forever without decay.
    ///
    /// # Arguments
    /// * `base_lr` - The rate at the start and end of every cycle.
    /// * `max_lr` - The rate at the peak of the first cycle, step `cycle_len / 2`.
    /// * `cycle_len` - The amount of steps in a cycle, at least two.
    ///
    /// # Returns
    /// A configuration error if the rates aren't `0 <= base_lr <= max_lr` or the cycle is too short.
    pub fn new(base_lr: f32, max_lr: f32, cycle_len: usize) -> Result<Self> {
        if !(base_lr.is_finite() && max_lr.is_finite()) || base_lr < 0. || base_lr > max_lr {
            return Err(MlErr::config(format!(
                "cyclic learning rate needs 0 <= base_lr <= max_lr, got {base_lr} and {max_lr}"
            )));
        }

        if cycle_len < 2 {
            return Err(MlErr::config(format!(
                "a learning rate cycle needs at least 2 steps, got {cycle_len}"
            )));
        }

        Ok(Self {
            base_lr,
            max_lr,
            cycle_len,
            num_cycles: None,
            decay: 1.,
            momentum: None,
        })
    }

    /// Stops cycling after `num_cycles` cycles.
    pub fn with_num_cycles(mut self, num_cycles: usize) -> Self {
        self.num_cycles = Some(num_cycles);
        self
    }

    /// Multiplies the amplitude of each cycle by `decay` with respect to the previous one.
    ///
    /// # Returns
    /// A configuration error if `decay` isn't in `(0, 1]`.
    pub fn with_decay(mut self, decay: f32) -> Result<Self> {
        if !(decay > 0. && decay <= 1.) {
            return Err(MlErr::config(format!(
                "the learning rate decay per cycle must be in (0, 1], got {decay}"
            )));
        }

        self.decay = decay;
        Ok(self)
    }

    /// Counter-cycles the momentum between `base_momentum` and `max_momentum`.
    ///
    /// # Returns
    /// A configuration error unless `0 <= base_momentum <= max_momentum < 1`.
    pub fn with_momentum(mut self, base_momentum: f32, max_momentum: f32) -> Result<Self> {
        if !(0.0..=max_momentum).contains(&base_momentum) || !(max_momentum < 1.) {
            return Err(MlErr::config(format!(
                "cyclic momentum needs 0 <= base <= max < 1, got {base_momentum} and {max_momentum}"
            )));
        }

        self.momentum = Some((base_momentum, max_momentum));
        Ok(self)
    }

    /// Returns the cycle `step` falls in and how far up the triangle it is, from 0 at the
    /// borders of the cycle to 1 at its peak. `None` once every cycle is over.
    ///
    /// The peak is at step `cycle_len / 2` of the cycle, an odd cycle spends its extra step
    /// coming down.
    fn phase(&self, step: usize) -> Option<(usize, f64)> {
        let cycle = step / self.cycle_len;

        if self.num_cycles.is_some_and(|n| cycle >= n) {
            return None;
        }

        let up = self.cycle_len / 2;
        let pos = step % self.cycle_len;
        let height = if pos <= up {
            pos as f64 / up as f64
        } else {
            (self.cycle_len - pos) as f64 / (self.cycle_len - up) as f64
        };

        Some((cycle, height))
    }
}

impl Schedule for CyclicLr {
    fn rate(&self, step: usize) -> f32 {
        let Some((cycle, height)) = self.phase(step) else {
            return self.base_lr;
        };

        let base = self.base_lr as f64;
        let amplitude = (self.max_lr as f64 - base) * (self.decay as f64).powi(cycle as i32);

        (base + amplitude * height) as f32
    }

    fn momentum(&self, step: usize) -> Option<f32> {
        let (low, high) = self.momentum?;
        let height = self.phase(step).map_or(0., |(_, height)| height);

        Some((high as f64 - (high - low) as f64 * height) as f32)
    }
}
