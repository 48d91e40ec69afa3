/// A learning rate schedule.
///
/// Schedules are stateless: the rate is a pure function of the global step, the amount of
/// mini-batch updates made since training started, so a run resumed from a checkpointed step
/// sees exactly the rates it would have seen.
pub trait Schedule {
    /// Returns the learning rate for the given step.
    fn rate(&self, step: usize) -> f32;

    /// Returns the momentum for the given step, if the schedule cycles it.
    fn momentum(&self, _step: usize) -> Option<f32> {
        None
    }
}
