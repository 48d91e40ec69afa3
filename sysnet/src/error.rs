use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The result type used in the entire sysnet crate.
pub type Result<T> = std::result::Result<T, SysnetErr>;

/// All errors that can occur while building, training and ensembling the models.
#[derive(Debug)]
pub enum SysnetErr {
    /// Invalid configuration or input, caught before any training happens.
    Configuration(String),
    /// An error raised by the numeric core.
    Ml(MlErr),
    /// A single (partition, seed) run failed, under the abort policy this fails the pipeline.
    PartitionFailed {
        partition: usize,
        seed: u64,
        source: MlErr,
    },
    /// Some samples have no predictions to ensemble.
    MissingCoverage { ids: Vec<u64> },
    Io(io::Error),
    Json(serde_json::Error),
}

impl SysnetErr {
    /// Shorthand for building a `Configuration` error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
}

impl fmt::Display for SysnetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Ml(e) => write!(f, "{e}"),
            Self::PartitionFailed {
                partition,
                seed,
                source,
            } => write!(f, "run of partition {partition} with seed {seed} failed: {source}"),
            Self::MissingCoverage { ids } => {
                let shown: Vec<_> = ids.iter().take(10).collect();
                write!(
                    f,
                    "{} sample(s) have no predictions, e.g. {shown:?}",
                    ids.len()
                )
            }
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for SysnetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::PartitionFailed { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for SysnetErr {
    fn from(e: MlErr) -> Self {
        match e {
            MlErr::Configuration(msg) => Self::Configuration(msg),
            e => Self::Ml(e),
        }
    }
}

impl From<io::Error> for SysnetErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for SysnetErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
