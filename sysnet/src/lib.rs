pub mod catalog;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod linear;
pub mod partition;
pub mod pipeline;
pub mod scaling;
pub mod tuning;

pub use error::{Result, SysnetErr};
