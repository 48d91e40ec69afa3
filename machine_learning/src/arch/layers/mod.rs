mod batch_norm;
mod dense;
mod layer;

pub use batch_norm::BatchNorm;
pub use dense::Dense;
pub use layer::Layer;

/// Whether the layers are being trained or evaluated.
///
/// Batch normalization depends on it: in `Train` it normalizes with the statistics of the
/// current batch and updates its running estimates, in `Eval` it uses the running estimates
/// as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}
