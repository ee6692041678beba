use std::{path::PathBuf, time::Instant};

use collective::{ProcessGroup, ReduceTarget};
use comms::LossMap;
use log::{debug, error, info};

use crate::{
    cadence::Cadence,
    checkpoint::{CheckpointManager, MetricDirection, initialize_from},
    compute::ComputeStep,
    config::TrainingConfig,
    context::RunContext,
    data::{InMemoryDataset, TrainLoader},
    error::{Result, TrainErr},
    logs::{ProcessRecord, RunLogs, TrainingRecord, ValidationRecord, timestamp},
    lr::LrSchedule,
    metrics::{LoopEvent, LoopMetrics, RunSummary, StopReason},
    optimization::{Optimizer, clip_grad_norm},
    seed::{Stream, rng_for},
    state::TrainingState,
    validation::{ValidationSetup, run_validation},
};

/// Where the training loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Loading initial parameters and resuming from the latest checkpoint.
    WarmupLoad,
    Running,
    Validating,
    Checkpointing,
    Stopped,
}

/// The knobs of the loop that don't belong to any collaborator.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub seed: u64,
    pub local_batch_size: usize,
    pub max_grad_norm: Option<f32>,
    pub target_metric: String,
    pub target_value: f32,
    pub direction: MetricDirection,
    pub initialize_from: Option<PathBuf>,
}

impl LoopSettings {
    pub fn from_config(cfg: &TrainingConfig) -> Self {
        Self {
            seed: cfg.seed,
            local_batch_size: cfg.local_batch_size,
            max_grad_norm: cfg.max_grad_norm,
            target_metric: cfg.target_metric.clone(),
            target_value: cfg.target_value,
            direction: cfg.metric_direction,
            initialize_from: cfg.initialize_parameters_from.clone(),
        }
    }
}

/// Drives a resumable training run, one iteration at a time.
///
/// Every process of the run owns one and advances it in lock-step with the
/// rest: the collective calls it makes only depend on the cadence, never on
/// locally computed data.
pub struct TrainingLoop<C, O> {
    ctx: RunContext,
    cadence: Cadence,
    settings: LoopSettings,
    state: TrainingState<O>,
    step: C,
    loader: TrainLoader,
    validation_set: InMemoryDataset,
    schedule: LrSchedule,
    checkpoints: CheckpointManager,
    logs: RunLogs,
    phase: Phase,
    metrics: LoopMetrics,

    // Losses of the running accumulation group, already scaled by its length.
    group_losses: LossMap,
    group_started: Instant,
}

impl<C, O> TrainingLoop<C, O>
where
    C: ComputeStep,
    O: Optimizer,
{
    /// Creates a new `TrainingLoop`.
    ///
    /// # Arguments
    /// * `cfg` - The run configuration.
    /// * `cadence` - The cadence `cfg` validated into.
    /// * `ctx` - Where this process sits within the run.
    /// * `step` - The compute step of the model.
    /// * `state` - The fresh state, overwritten on resume.
    /// * `train_set` - The whole training set, sharded by rank.
    /// * `validation_set` - The whole validation set, sharded by rank.
    ///
    /// # Errors
    /// If this process' shard of the training set is empty.
    pub fn new(
        cfg: &TrainingConfig,
        cadence: Cadence,
        ctx: RunContext,
        step: C,
        state: TrainingState<O>,
        train_set: InMemoryDataset,
        validation_set: InMemoryDataset,
    ) -> Result<Self> {
        let loader = TrainLoader::new(
            cfg.loader,
            train_set,
            ctx.shard(),
            cfg.local_batch_size,
            cfg.seed,
        )?;

        Ok(Self {
            ctx,
            cadence,
            settings: LoopSettings::from_config(cfg),
            state,
            step,
            loader,
            validation_set,
            schedule: cfg.lr_schedule(),
            checkpoints: CheckpointManager::new(cfg.checkpoints_dir(), cfg.retention_policy()),
            logs: RunLogs::new(&cfg.logs_dir(), &ctx, &cadence, cfg.save_process_logs),
            phase: Phase::WarmupLoad,
            metrics: LoopMetrics::default(),
            group_losses: LossMap::new(),
            group_started: Instant::now(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TrainingState<O> {
        &self.state
    }

    pub fn into_state(self) -> TrainingState<O> {
        self.state
    }

    pub fn step(&self) -> &C {
        &self.step
    }

    /// Runs every remaining iteration of the run.
    ///
    /// On a fatal error every other process of `group` is told to fail too.
    ///
    /// # Returns
    /// A summary of the run once every process reached the final barrier.
    pub async fn run<G: ProcessGroup>(&mut self, group: &mut G) -> Result<RunSummary> {
        match self.run_inner(group).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(rank = self.ctx.rank(), iteration = self.state.iteration; "training failed: {e}");
                self.phase = Phase::Stopped;
                group.abort(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_inner<G: ProcessGroup>(&mut self, group: &mut G) -> Result<RunSummary> {
        self.phase = Phase::WarmupLoad;
        info!(rank = self.ctx.rank(), world_size = self.ctx.world_size(); "init_start");

        if let Some(path) = &self.settings.initialize_from {
            initialize_from(path, &mut self.state)?;
        }

        let resumed = self
            .checkpoints
            .resume_latest(&mut self.state, &self.cadence)?;

        // One batch and one forward stream per iteration, so both continue where they were left.
        self.loader.seek(resumed);
        self.state.seeds_consumed = resumed;

        let start_iteration = resumed + 1;
        let train_iters = self.cadence.train_iters();

        info!(rank = self.ctx.rank(), start_iteration, train_iters; "run_start");
        self.phase = Phase::Running;

        let mut stop_reason = StopReason::Completed;
        let mut last_metric = None;

        for iteration in start_iteration..=train_iters {
            let (stop, metric) = self.iteration(iteration, group).await?;
            last_metric = metric.or(last_metric);

            if stop {
                stop_reason = StopReason::TargetReached;
                break;
            }
        }

        self.phase = Phase::Stopped;
        self.logs.flush();
        group.barrier().await?;

        let final_iteration = self.state.iteration;
        info!(
            rank = self.ctx.rank(), final_iteration, reason:% = stop_reason;
            "run_stop"
        );

        Ok(RunSummary {
            start_iteration,
            final_iteration,
            stop_reason,
            last_metric,
            metrics: self.metrics.clone(),
        })
    }

    /// Runs iteration `i`.
    ///
    /// # Returns
    /// Whether the run must stop, and the aggregate metric if the coordinator validated.
    async fn iteration<G: ProcessGroup>(
        &mut self,
        i: u64,
        group: &mut G,
    ) -> Result<(bool, Option<f32>)> {
        let started = Instant::now();
        let rank = self.ctx.rank();
        let compute_err = |source| TrainErr::Compute {
            iteration: i,
            source,
        };

        let mut rng = rng_for(self.settings.seed, Stream::Forward, rank, i);
        self.state.seeds_consumed += 1;

        let batch = self.loader.next_batch();

        if self.cadence.is_group_start(i) {
            self.state.zero_grads();
            self.group_losses.clear();
            self.group_started = started;
        }

        let scale = 1.0 / self.cadence.accumulation_iters() as f32;

        let Self { step, state, .. } = self;
        let outputs = step
            .forward(&state.params, &batch, &mut rng)
            .map_err(compute_err)?;
        let (_, losses) = step.loss(&outputs, &batch);
        step.backward(&state.params, &outputs, &batch, scale, &mut state.grads)
            .map_err(compute_err)?;

        for (name, value) in &losses {
            *self.group_losses.entry(name.clone()).or_default() += value * scale;
        }

        self.metrics.compute_time += started.elapsed();
        self.metrics.bump_iteration(batch.len());

        if self.logs.wants_process_records() {
            self.logs.process(&ProcessRecord {
                iteration: i,
                sample_ids: batch.ids.clone(),
                timestamp: timestamp(),
                losses,
                duration: started.elapsed().as_secs_f64(),
            });
        }

        if self.cadence.is_group_end(i) {
            self.optimizer_step(i);
            self.state
                .optimizer
                .step(&self.state.grads, &mut self.state.params)?;
            self.state.averager.update(&self.state.params);

            if self.cadence.logging_enabled() {
                self.log_group(i, group).await?;
            }
        }

        self.state.iteration = i;

        if self.cadence.is_log_flush(i) {
            self.logs.flush();
        }

        let mut stop = false;
        let mut metric = None;
        let validating = self.cadence.is_validation(i);

        if validating {
            (stop, metric) = self.validate(i, group).await?;
        }

        if self.cadence.is_checkpoint(i) && self.ctx.is_coordinator() {
            self.phase = Phase::Checkpointing;
            self.checkpoints
                .save(&self.state, i, metric, validating)?;
            self.metrics.record(LoopEvent::Checkpoint { iteration: i });
        }

        self.phase = Phase::Running;
        Ok((stop, metric))
    }

    /// Clips the accumulated gradient and applies the learning rate of `i`.
    fn optimizer_step(&mut self, i: u64) {
        if let Some(max_norm) = self.settings.max_grad_norm {
            let norm = clip_grad_norm(&mut self.state.grads, max_norm);
            debug!(iteration = i, norm; "gradient norm");
        }

        let lr_changed = self.schedule.apply(i, &mut self.state.optimizer);
        self.metrics.record(LoopEvent::OptimizerStep {
            iteration: i,
            lr_changed,
        });
    }

    /// Averages the losses of the group that just ended onto the coordinator.
    async fn log_group<G: ProcessGroup>(&mut self, i: u64, group: &mut G) -> Result<()> {
        let started = Instant::now();
        let averaged = group
            .average_reduce(&self.group_losses, ReduceTarget::Coordinator)
            .await?;
        self.metrics.collective_time += started.elapsed();

        if let Some(losses_avg) = averaged {
            self.logs.training(&TrainingRecord {
                iteration: i,
                global_batch_size: self.ctx.global_batch_size(self.settings.local_batch_size),
                num_accumulated_iters: self.cadence.accumulation_iters(),
                timestamp: timestamp(),
                losses_avg,
                duration: self.group_started.elapsed().as_secs_f64(),
            });
        }

        Ok(())
    }

    /// Runs a validation cycle and agrees on whether to stop.
    ///
    /// Every process reaches the broadcast, only the coordinator's vote counts.
    async fn validate<G: ProcessGroup>(
        &mut self,
        i: u64,
        group: &mut G,
    ) -> Result<(bool, Option<f32>)> {
        self.phase = Phase::Validating;

        let Self {
            ctx,
            settings,
            state,
            step,
            validation_set,
            logs,
            metrics,
            ..
        } = self;

        let setup = ValidationSetup {
            dataset: validation_set,
            shard: ctx.shard(),
            target_metric: &settings.target_metric,
            seed: settings.seed,
        };

        let outcome = run_validation(step, state.eval_params(), setup, group, i).await?;
        metrics.validation_time += outcome.duration;

        let reached = outcome
            .metric
            .is_some_and(|m| settings.direction.reached(m, settings.target_value));

        let stop = group.broadcast_flag(reached).await?;

        if let (Some(metric), Some(records)) = (outcome.metric, outcome.records) {
            let elapsed = outcome.duration.as_secs_f64();
            let size = records.len();

            logs.validation(&ValidationRecord {
                iteration: i,
                metric_name: settings.target_metric.clone(),
                metric,
                timestamp: timestamp(),
                duration: elapsed,
                size,
                throughput: if elapsed > 0.0 { size as f64 / elapsed } else { 0.0 },
                metrics_list: records,
            });

            info!(iteration = i, metric, target = settings.target_value, stop; "validation finished");
        }

        metrics.record(LoopEvent::Validation {
            iteration: i,
            metric: outcome.metric,
        });

        Ok((stop, outcome.metric))
    }
}
