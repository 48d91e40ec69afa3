use super::Schedule;

/// The same learning rate on every step.
#[derive(Debug, Clone, Copy)]
pub struct ConstantLr(pub f32);

impl Schedule for ConstantLr {
    fn rate(&self, _step: usize) -> f32 {
        self.0
    }
}
