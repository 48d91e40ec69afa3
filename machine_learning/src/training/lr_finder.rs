use serde::{Deserialize, Serialize};

/// Weight of the newest loss in the exponential moving average.
const SMOOTHING: f32 = 0.05;
/// The sweep stops once the smoothed loss exceeds the best one by this factor.
const DIVERGENCE: f32 = 5.0;

/// A single step of a learning rate range test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrProbe {
    pub lr: f32,
    pub loss: f32,
    pub smoothed_loss: f32,
}

/// The record of a learning rate range test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LrSweep {
    probes: Vec<LrProbe>,
    best_loss: Option<f32>,
    diverged: bool,
}

impl LrSweep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the loss seen at `lr`.
    ///
    /// # Returns
    /// Whether the sweep should keep going, `false` once the loss diverged.
    pub fn record(&mut self, lr: f32, loss: f32) -> bool {
        if !loss.is_finite() {
            self.diverged = true;
            return false;
        }

        let smoothed_loss = match self.probes.last() {
            Some(last) => SMOOTHING * loss + (1.0 - SMOOTHING) * last.smoothed_loss,
            None => loss,
        };

        self.probes.push(LrProbe {
            lr,
            loss,
            smoothed_loss,
        });

        let best = self.best_loss.map_or(smoothed_loss, |b| b.min(smoothed_loss));
        self.best_loss = Some(best);

        if smoothed_loss > DIVERGENCE * best {
            self.diverged = true;
        }

        !self.diverged
    }

    pub fn probes(&self) -> &[LrProbe] {
        &self.probes
    }

    /// Whether the sweep was cut short because the loss blew up.
    pub fn diverged(&self) -> bool {
        self.diverged
    }

    /// Returns the learning rate where the smoothed loss falls the fastest with respect to the
    /// logarithm of the learning rate, a good `max_lr` for a cyclic schedule.
    pub fn suggestion(&self) -> Option<f32> {
        self.probes
            .windows(2)
            .filter(|w| w[1].lr > w[0].lr)
            .map(|w| {
                let slope =
                    (w[1].smoothed_loss - w[0].smoothed_loss) / (w[1].lr.ln() - w[0].lr.ln());
                (w[0].lr, slope)
            })
            .filter(|(_, slope)| *slope < 0.0)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(lr, _)| lr)
    }
}
