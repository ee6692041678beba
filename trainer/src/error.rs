use std::{error::Error, fmt, io, path::PathBuf};

use collective::CollectiveErr;

use crate::{cadence::CadenceViolation, config::PrecisionMode, optimization::SizeMismatchErr};

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Every violated interval constraint of a cadence configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadenceErr {
    pub violations: Vec<CadenceViolation>,
}

impl fmt::Display for CadenceErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cadence:")?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl Error for CadenceErr {}

/// Problems with the run configuration, all detected before training starts.
#[derive(Debug)]
pub enum ConfigErr {
    Io(io::Error),
    Parse(serde_json::Error),
    Cadence(CadenceErr),
    UnsupportedPrecision(PrecisionMode),
    InvalidValue {
        name: &'static str,
        reason: String,
    },
    Environment {
        var: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Io(e) => write!(f, "couldn't read the configuration: {e}"),
            ConfigErr::Parse(e) => write!(f, "malformed configuration: {e}"),
            ConfigErr::Cadence(e) => write!(f, "{e}"),
            ConfigErr::UnsupportedPrecision(mode) => {
                write!(f, "precision mode {mode} is not supported, use fp32 or tf32")
            }
            ConfigErr::InvalidValue { name, reason } => write!(f, "invalid {name}: {reason}"),
            ConfigErr::Environment { var, reason } => {
                write!(f, "invalid environment variable {var}: {reason}")
            }
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Io(e) => Some(e),
            ConfigErr::Parse(e) => Some(e),
            ConfigErr::Cadence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl From<CadenceErr> for ConfigErr {
    fn from(value: CadenceErr) -> Self {
        Self::Cadence(value)
    }
}

/// Failures reading or writing checkpoint artifacts.
#[derive(Debug)]
pub enum CheckpointErr {
    Io { path: PathBuf, source: io::Error },
    Format { path: PathBuf, reason: String },
    MissingTensor { path: PathBuf, name: &'static str },
    SizeMismatch(SizeMismatchErr),
}

impl fmt::Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointErr::Io { path, source } => {
                write!(f, "checkpoint io error at {}: {source}", path.display())
            }
            CheckpointErr::Format { path, reason } => {
                write!(f, "corrupt checkpoint {}: {reason}", path.display())
            }
            CheckpointErr::MissingTensor { path, name } => {
                write!(f, "checkpoint {} has no `{name}` tensor", path.display())
            }
            CheckpointErr::SizeMismatch(e) => write!(f, "checkpoint doesn't fit the model: {e}"),
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointErr::Io { source, .. } => Some(source),
            CheckpointErr::SizeMismatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SizeMismatchErr> for CheckpointErr {
    fn from(value: SizeMismatchErr) -> Self {
        Self::SizeMismatch(value)
    }
}

/// Errors returned by a compute step collaborator.
pub type ComputeErr = Box<dyn Error + Send + Sync>;

/// Fatal failures of a training run.
#[derive(Debug)]
pub enum TrainErr {
    Config(ConfigErr),
    Checkpoint(CheckpointErr),
    Collective(CollectiveErr),
    Optimizer(SizeMismatchErr),
    Compute {
        iteration: u64,
        source: ComputeErr,
    },
    MisalignedResume {
        iteration: u64,
        accumulation_iters: u64,
    },
    MissingMetric {
        name: String,
    },
    NonFiniteMetric {
        name: String,
        value: f32,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Config(e) => write!(f, "{e}"),
            TrainErr::Checkpoint(e) => write!(f, "{e}"),
            TrainErr::Collective(e) => write!(f, "collective operation failed: {e}"),
            TrainErr::Optimizer(e) => write!(f, "optimizer step failed: {e}"),
            TrainErr::Compute { iteration, source } => {
                write!(f, "compute step failed at iteration {iteration}: {source}")
            }
            TrainErr::MisalignedResume {
                iteration,
                accumulation_iters,
            } => write!(
                f,
                "can't resume from iteration {iteration}, it is not a multiple of accumulation_iters={accumulation_iters}"
            ),
            TrainErr::MissingMetric { name } => {
                write!(f, "validation records don't carry the `{name}` metric")
            }
            TrainErr::NonFiniteMetric { name, value } => {
                write!(f, "metric `{name}` is not finite: {value}")
            }
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Config(e) => Some(e),
            TrainErr::Checkpoint(e) => Some(e),
            TrainErr::Collective(e) => Some(e),
            TrainErr::Optimizer(e) => Some(e),
            TrainErr::Compute { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<ConfigErr> for TrainErr {
    fn from(value: ConfigErr) -> Self {
        Self::Config(value)
    }
}

impl From<CadenceErr> for TrainErr {
    fn from(value: CadenceErr) -> Self {
        Self::Config(ConfigErr::Cadence(value))
    }
}

impl From<CheckpointErr> for TrainErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<CollectiveErr> for TrainErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}

impl From<SizeMismatchErr> for TrainErr {
    fn from(value: SizeMismatchErr) -> Self {
        Self::Optimizer(value)
    }
}
