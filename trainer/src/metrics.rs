use std::{fmt, time::Duration};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every configured iteration ran.
    Completed,
    /// The validation metric reached its target.
    TargetReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => f.write_str("completed"),
            StopReason::TargetReached => f.write_str("target reached"),
        }
    }
}

/// Something the loop did at a given iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopEvent {
    OptimizerStep { iteration: u64, lr_changed: bool },
    Validation { iteration: u64, metric: Option<f32> },
    Checkpoint { iteration: u64 },
}

/// Counters and timings collected by the training loop.
#[derive(Debug, Default, Clone)]
pub struct LoopMetrics {
    pub compute_time: Duration,
    pub validation_time: Duration,
    pub collective_time: Duration,

    pub iterations: u64,
    pub optimizer_steps: u64,
    pub validations: u64,
    pub checkpoints: u64,
    pub samples: u64,

    pub events: Vec<LoopEvent>,
}

impl LoopMetrics {
    #[inline]
    pub fn bump_iteration(&mut self, samples: usize) {
        self.iterations += 1;
        self.samples += samples as u64;
    }

    #[inline]
    pub fn record(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::OptimizerStep { .. } => self.optimizer_steps += 1,
            LoopEvent::Validation { .. } => self.validations += 1,
            LoopEvent::Checkpoint { .. } => self.checkpoints += 1,
        }

        self.events.push(event);
    }

    /// Optimizer steps taken before the first validation, if there was one.
    pub fn steps_before_first_validation(&self) -> Option<u64> {
        let first = self
            .events
            .iter()
            .position(|e| matches!(e, LoopEvent::Validation { .. }))?;

        let steps = self.events[..first]
            .iter()
            .filter(|e| matches!(e, LoopEvent::OptimizerStep { .. }))
            .count();

        Some(steps as u64)
    }
}

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The first iteration this invocation ran, after resuming.
    pub start_iteration: u64,
    /// The last iteration that completed.
    pub final_iteration: u64,
    pub stop_reason: StopReason,
    /// The last aggregate validation metric seen by the coordinator.
    pub last_metric: Option<f32>,
    pub metrics: LoopMetrics,
}
