use std::{fmt, num::NonZeroU64};

use serde::{Deserialize, Serialize};

use crate::error::CadenceErr;

/// The raw iteration intervals of a run, as configured.
///
/// Non-positive `checkpoint_every` or `log_every` disable that cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceConfig {
    pub train_iters: i64,
    pub accumulation_iters: i64,
    pub val_every: i64,
    pub checkpoint_every: i64,
    pub log_every: i64,
    pub warmup_iters: i64,
}

/// A single broken constraint among the configured intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CadenceViolation {
    NotPositive {
        name: &'static str,
        value: i64,
    },
    Negative {
        name: &'static str,
        value: i64,
    },
    NotMultiple {
        name: &'static str,
        value: i64,
        of: &'static str,
        divisor: i64,
    },
}

impl fmt::Display for CadenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CadenceViolation::NotPositive { name, value } => {
                write!(f, "{name} must be positive, got {value}")
            }
            CadenceViolation::Negative { name, value } => {
                write!(f, "{name} must not be negative, got {value}")
            }
            CadenceViolation::NotMultiple {
                name,
                value,
                of,
                divisor,
            } => write!(f, "{name}={value} must be a multiple of {of}={divisor}"),
        }
    }
}

impl CadenceConfig {
    /// Checks every divisibility constraint among the intervals.
    ///
    /// Nothing is touched, this is meant to run before any process group exists.
    ///
    /// # Returns
    /// The validated `Cadence`, or an error listing every violated constraint.
    pub fn validate(&self) -> Result<Cadence, CadenceErr> {
        let mut violations = Vec::new();

        let Self {
            train_iters,
            accumulation_iters: acc,
            val_every,
            checkpoint_every: ckpt,
            log_every: log,
            warmup_iters,
        } = *self;

        for (name, value) in [("train_iters", train_iters), ("warmup_iters", warmup_iters)] {
            if value < 0 {
                violations.push(CadenceViolation::Negative { name, value });
            }
        }

        for (name, value) in [("accumulation_iters", acc), ("val_every", val_every)] {
            if value <= 0 {
                violations.push(CadenceViolation::NotPositive { name, value });
            }
        }

        let mut require_multiple = |name, value: i64, of, divisor: i64| {
            if divisor > 0 && value % divisor != 0 {
                violations.push(CadenceViolation::NotMultiple {
                    name,
                    value,
                    of,
                    divisor,
                });
            }
        };

        require_multiple("train_iters", train_iters, "accumulation_iters", acc);
        require_multiple("warmup_iters", warmup_iters, "accumulation_iters", acc);
        require_multiple("val_every", val_every, "accumulation_iters", acc);

        if ckpt > 0 {
            require_multiple("checkpoint_every", ckpt, "accumulation_iters", acc);
            require_multiple("val_every", val_every, "checkpoint_every", ckpt);
        }

        if log > 0 {
            require_multiple("log_every", log, "accumulation_iters", acc);
            require_multiple("val_every", val_every, "log_every", log);
        }

        if ckpt > 0 && log > 0 {
            require_multiple("checkpoint_every", ckpt, "log_every", log);
        }

        if !violations.is_empty() {
            return Err(CadenceErr { violations });
        }

        // SAFETY: Both were checked to be positive above.
        let accumulation_iters = NonZeroU64::new(acc as u64).unwrap();
        let val_every = NonZeroU64::new(val_every as u64).unwrap();

        Ok(Cadence {
            train_iters: train_iters as u64,
            accumulation_iters,
            val_every,
            checkpoint_every: NonZeroU64::new(ckpt.max(0) as u64),
            log_every: NonZeroU64::new(log.max(0) as u64),
            warmup_iters: warmup_iters as u64,
        })
    }
}

/// Validated intervals and the iteration predicates derived from them.
///
/// Every process evaluates these identically from configuration alone, which
/// is what keeps the collective calls of every process in the same order.
/// Iterations are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    train_iters: u64,
    accumulation_iters: NonZeroU64,
    val_every: NonZeroU64,
    checkpoint_every: Option<NonZeroU64>,
    log_every: Option<NonZeroU64>,
    warmup_iters: u64,
}

impl Cadence {
    pub fn train_iters(&self) -> u64 {
        self.train_iters
    }

    pub fn accumulation_iters(&self) -> u64 {
        self.accumulation_iters.get()
    }

    pub fn warmup_iters(&self) -> u64 {
        self.warmup_iters
    }

    /// Returns true if the run writes training logs and reduces losses.
    pub fn logging_enabled(&self) -> bool {
        self.log_every.is_some()
    }

    /// Returns true if `iteration` opens an accumulation group.
    #[inline]
    pub fn is_group_start(&self, iteration: u64) -> bool {
        (iteration - 1) % self.accumulation_iters.get() == 0
    }

    /// Returns true if `iteration` closes an accumulation group.
    #[inline]
    pub fn is_group_end(&self, iteration: u64) -> bool {
        iteration % self.accumulation_iters.get() == 0
    }

    #[inline]
    pub fn is_validation(&self, iteration: u64) -> bool {
        iteration % self.val_every.get() == 0
    }

    #[inline]
    pub fn is_checkpoint(&self, iteration: u64) -> bool {
        self.checkpoint_every
            .is_some_and(|every| iteration % every.get() == 0)
    }

    #[inline]
    pub fn is_log_flush(&self, iteration: u64) -> bool {
        self.log_every
            .is_some_and(|every| iteration % every.get() == 0)
    }

    /// Returns true if a run may resume right after `iteration`.
    ///
    /// Resuming into the middle of an accumulation group is not allowed.
    #[inline]
    pub fn is_resumable(&self, iteration: u64) -> bool {
        self.is_group_end(iteration)
    }
}
