pub mod activations;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use layers::Mode;
pub use model::{Model, ModelState};
pub use sequential::Sequential;
