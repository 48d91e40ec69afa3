mod act_fn;
mod exp;
mod relu;
mod sigmoid;

pub use act_fn::ActFn;
pub use exp::Exp;
pub use relu::Relu;
pub use sigmoid::Sigmoid;
