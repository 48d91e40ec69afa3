use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// An invalid hyper-parameter or specification, detected before any training happens.
    Configuration(String),
    /// A cost function was evaluated outside of its domain.
    Domain {
        what: &'static str,
        index: usize,
        value: f32,
    },
    /// The loss or gradient stopped being finite, the run that produced it can't continue.
    NumericalInstability {
        epoch: usize,
        step: usize,
        loss: f32,
    },
    /// The run was cancelled from outside at an epoch boundary.
    Cancelled {
        epoch: usize,
    },
}

impl MlErr {
    /// Shorthand for building a `Configuration` error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            MlErr::Domain { what, index, value } => write!(
                f,
                "{what} is out of domain at index {index}: got {value}"
            ),
            MlErr::NumericalInstability { epoch, step, loss } => write!(
                f,
                "non-finite loss ({loss}) at epoch {epoch}, step {step}, try a lower max learning rate"
            ),
            MlErr::Cancelled { epoch } => write!(f, "training cancelled at epoch {epoch}"),
        }
    }
}

impl Error for MlErr {}
