pub mod cadence;
pub mod checkpoint;
pub mod compute;
pub mod config;
pub mod context;
pub mod controller;
pub mod data;
mod error;
pub mod logs;
pub mod lr;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod seed;
pub mod state;
pub mod swa;
pub mod validation;

pub use cadence::{Cadence, CadenceConfig, CadenceViolation};
pub use checkpoint::{CheckpointManager, MetricDirection, RetentionPolicy};
pub use compute::{ComputeStep, SampleMetrics};
pub use config::{OptimizerConfig, PrecisionMode, TrainingConfig};
pub use context::RunContext;
pub use controller::{LoopSettings, Phase, TrainingLoop};
pub use error::{CadenceErr, CheckpointErr, ComputeErr, ConfigErr, Result, TrainErr};
pub use lr::LrSchedule;
pub use metrics::{LoopEvent, LoopMetrics, RunSummary, StopReason};
pub use model::LinearRegression;
pub use state::TrainingState;
pub use swa::WeightAverager;
