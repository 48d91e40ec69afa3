mod constant;
mod cosine;
mod cyclic;
mod exponential;
mod schedule;

pub use constant::ConstantLr;
pub use cosine::CosineWarmRestarts;
pub use cyclic::CyclicLr;
pub use exponential::ExponentialLr;
pub use schedule::Schedule;
