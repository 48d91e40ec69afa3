mod loss_fn;
mod mse;
mod poisson;

pub use loss_fn::LossFn;
pub use mse::Mse;
pub use poisson::PoissonNll;
