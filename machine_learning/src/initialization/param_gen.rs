/// A source of initial parameter values, consumed layer by layer when a model is initialized.
pub trait ParamGen {
    /// Draws up to `n` values.
    ///
    /// # Returns
    /// Fewer than `n` values when the generator runs out midway, `None` once it's exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}
