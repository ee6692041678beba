use std::{fmt, fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    cadence::{Cadence, CadenceConfig},
    checkpoint::{MetricDirection, RetentionPolicy},
    data::LoaderKind,
    error::ConfigErr,
    lr::LrSchedule,
    optimization::{Adam, AnyOptimizer, GradientDescent},
    swa::WeightAverager,
};

/// The numeric precision the compute step runs at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionMode {
    Fp32,
    #[default]
    Tf32,
    Bf16,
    Fp16,
    Amp,
}

impl PrecisionMode {
    pub fn is_supported(self) -> bool {
        matches!(self, PrecisionMode::Fp32 | PrecisionMode::Tf32)
    }
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrecisionMode::Fp32 => "fp32",
            PrecisionMode::Tf32 => "tf32",
            PrecisionMode::Bf16 => "bf16",
            PrecisionMode::Fp16 => "fp16",
            PrecisionMode::Amp => "amp",
        };

        f.write_str(name)
    }
}

/// The optimizer algorithm and its hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        #[serde(default = "defaults::beta1")]
        beta1: f32,
        #[serde(default = "defaults::beta2")]
        beta2: f32,
        #[serde(default = "defaults::epsilon")]
        epsilon: f32,
    },
    GradientDescent,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            beta1: defaults::beta1(),
            beta2: defaults::beta2(),
            epsilon: defaults::epsilon(),
        }
    }
}

impl OptimizerConfig {
    /// Builds the optimizer for `len` parameters, starting at `lr`.
    pub fn build(&self, len: usize, lr: f32) -> AnyOptimizer {
        match *self {
            Self::Adam {
                beta1,
                beta2,
                epsilon,
            } => AnyOptimizer::Adam(Adam::new(len, lr, beta1, beta2, epsilon)),
            Self::GradientDescent => AnyOptimizer::GradientDescent(GradientDescent::new(len, lr)),
        }
    }
}

/// The whole configuration of a training run.
///
/// Missing fields take the defaults below, unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Where checkpoints and logs are written.
    pub training_dirpath: PathBuf,
    pub train_iters: i64,
    pub accumulation_iters: i64,
    pub val_every: i64,
    pub checkpoint_every: i64,
    pub log_every: i64,
    pub local_batch_size: usize,
    pub seed: u64,
    pub precision: PrecisionMode,
    pub loader: LoaderKind,

    pub base_lr: f64,
    pub final_lr: f64,
    pub warmup_iters: i64,
    pub plateau_iters: i64,
    pub optimizer: OptimizerConfig,
    /// Clip the gradient norm at every optimizer step when set.
    pub max_grad_norm: Option<f32>,

    pub swa_enabled: bool,
    pub swa_decay_rate: f32,

    /// The per-sample validation metric averaged into the stop decision.
    pub target_metric: String,
    pub target_value: f32,
    pub metric_direction: MetricDirection,

    pub keep_last_checkpoints: usize,
    pub keep_best_checkpoints: usize,
    pub keep_val_checkpoints: bool,

    /// Optional checkpoint to take the initial parameters from.
    pub initialize_parameters_from: Option<PathBuf>,
    pub save_process_logs: bool,
}

mod defaults {
    pub fn beta1() -> f32 {
        0.9
    }

    pub fn beta2() -> f32 {
        0.999
    }

    pub fn epsilon() -> f32 {
        1e-6
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            training_dirpath: PathBuf::from("training"),
            train_iters: 2000,
            accumulation_iters: 1,
            val_every: 40,
            checkpoint_every: 0,
            log_every: -1,
            local_batch_size: 1,
            seed: 1234567890,
            precision: PrecisionMode::default(),
            loader: LoaderKind::default(),
            base_lr: 1e-3,
            final_lr: 5e-5,
            warmup_iters: 0,
            plateau_iters: 6000,
            optimizer: OptimizerConfig::default(),
            max_grad_norm: Some(0.1),
            swa_enabled: false,
            swa_decay_rate: 0.9,
            target_metric: "accuracy".to_string(),
            target_value: 0.8,
            metric_direction: MetricDirection::Higher,
            keep_last_checkpoints: 0,
            keep_best_checkpoints: 0,
            keep_val_checkpoints: false,
            initialize_parameters_from: None,
            save_process_logs: false,
        }
    }
}

impl TrainingConfig {
    /// Loads a `TrainingConfig` from a JSON file.
    ///
    /// # Errors
    /// If the file can't be read or isn't a valid configuration. Values are not validated.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigErr> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn cadence_config(&self) -> CadenceConfig {
        CadenceConfig {
            train_iters: self.train_iters,
            accumulation_iters: self.accumulation_iters,
            val_every: self.val_every,
            checkpoint_every: self.checkpoint_every,
            log_every: self.log_every,
            warmup_iters: self.warmup_iters,
        }
    }

    /// Checks every value of the configuration.
    ///
    /// Meant to run before any process group or device state exists.
    ///
    /// # Returns
    /// The validated cadence of the run.
    pub fn validate(&self) -> Result<Cadence, ConfigErr> {
        let cadence = self.cadence_config().validate()?;

        if !self.precision.is_supported() {
            return Err(ConfigErr::UnsupportedPrecision(self.precision));
        }

        let invalid = |name, reason: &str| {
            Err(ConfigErr::InvalidValue {
                name,
                reason: reason.to_string(),
            })
        };

        if self.local_batch_size == 0 {
            return invalid("local_batch_size", "must be positive");
        }

        if self.plateau_iters < 0 {
            return invalid("plateau_iters", "must not be negative");
        }

        if !(self.base_lr > 0. && self.final_lr >= 0.) {
            return invalid("base_lr", "learning rates must be positive");
        }

        if self.max_grad_norm.is_some_and(|norm| !(norm > 0.)) {
            return invalid("max_grad_norm", "must be positive");
        }

        if self.swa_enabled && !(0. ..1.).contains(&self.swa_decay_rate) {
            return invalid("swa_decay_rate", "must be within [0, 1)");
        }

        if self.target_metric.is_empty() {
            return invalid("target_metric", "must name a validation metric");
        }

        Ok(cadence)
    }

    pub fn lr_schedule(&self) -> LrSchedule {
        LrSchedule::new(
            self.base_lr,
            self.final_lr,
            self.warmup_iters.max(0) as u64,
            self.plateau_iters.max(0) as u64,
        )
    }

    pub fn weight_averager(&self) -> WeightAverager {
        if self.swa_enabled {
            WeightAverager::new(self.swa_decay_rate)
        } else {
            WeightAverager::disabled()
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: self.keep_last_checkpoints,
            keep_best: self.keep_best_checkpoints,
            keep_validation: self.keep_val_checkpoints,
            direction: self.metric_direction,
        }
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.training_dirpath.join("checkpoints")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.training_dirpath.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: TrainingConfig = serde_json::from_str(r#"{ "train_iters": 80 }"#).unwrap();

        assert_eq!(cfg.train_iters, 80);
        assert_eq!(cfg.val_every, 40);
        assert_eq!(cfg.seed, 1234567890);
        assert_eq!(cfg.precision, PrecisionMode::Tf32);
        assert_eq!(cfg.target_value, 0.8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_nested_values() {
        let cfg: TrainingConfig = serde_json::from_str(
            r#"{
                "precision": "fp32",
                "loader": "shuffled",
                "optimizer": { "type": "gradient_descent" },
                "metric_direction": "lower",
                "max_grad_norm": null
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.loader, LoaderKind::Shuffled);
        assert_eq!(cfg.optimizer, OptimizerConfig::GradientDescent);
        assert_eq!(cfg.metric_direction, MetricDirection::Lower);
        assert_eq!(cfg.max_grad_norm, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: Result<TrainingConfig, _> = serde_json::from_str(r#"{ "val_evry": 4 }"#);
        assert!(res.is_err());
    }

    #[test]
    fn unsupported_precision_is_a_config_error() {
        for precision in [PrecisionMode::Bf16, PrecisionMode::Fp16, PrecisionMode::Amp] {
            let cfg = TrainingConfig {
                precision,
                ..Default::default()
            };

            assert!(matches!(
                cfg.validate(),
                Err(ConfigErr::UnsupportedPrecision(p)) if p == precision
            ));
        }
    }

    #[test]
    fn cadence_errors_come_first() {
        let cfg = TrainingConfig {
            checkpoint_every: 7,
            precision: PrecisionMode::Amp,
            ..Default::default()
        };

        assert!(matches!(cfg.validate(), Err(ConfigErr::Cadence(_))));
    }
}
