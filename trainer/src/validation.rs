use std::{
    ops::{Deref, DerefMut},
    time::{Duration, Instant},
};

use collective::ProcessGroup;
use comms::SampleRecord;
use log::debug;

use crate::{
    compute::ComputeStep,
    data::{InMemoryDataset, ShardSpec, validation_batches},
    error::{Result, TrainErr},
    seed::{Stream, rng_for},
};

/// Keeps a compute step in evaluation mode while alive.
///
/// Training mode comes back on drop, whichever way the scope is left.
pub struct EvalMode<'a, C: ComputeStep> {
    step: &'a mut C,
}

impl<'a, C: ComputeStep> EvalMode<'a, C> {
    pub fn enter(step: &'a mut C) -> Self {
        step.set_training(false);
        Self { step }
    }
}

impl<C: ComputeStep> Deref for EvalMode<'_, C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.step
    }
}

impl<C: ComputeStep> DerefMut for EvalMode<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.step
    }
}

impl<C: ComputeStep> Drop for EvalMode<'_, C> {
    fn drop(&mut self) {
        self.step.set_training(true);
    }
}

/// What a validation cycle produced on this process.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// The mean of the target metric, only on the coordinator.
    pub metric: Option<f32>,
    /// Every sample's record in canonical order, only on the coordinator.
    pub records: Option<Vec<SampleRecord>>,
    /// The amount of samples this process evaluated.
    pub local_samples: usize,
    pub duration: Duration,
}

/// The inputs of a validation cycle that don't change across a run.
#[derive(Debug, Clone, Copy)]
pub struct ValidationSetup<'a> {
    pub dataset: &'a InMemoryDataset,
    pub shard: ShardSpec,
    pub target_metric: &'a str,
    pub seed: u64,
}

/// Evaluates `params` on this process' shard of the validation set and
/// gathers every record onto the coordinator.
///
/// Every process must call this at the same iterations. Transient caches of
/// the step are released before gathering.
///
/// # Arguments
/// * `step` - The compute step, switched to evaluation mode meanwhile.
/// * `params` - The parameters to evaluate, the averaged ones when enabled.
/// * `setup` - The validation set and the metric to aggregate.
/// * `group` - The process group to gather over.
/// * `iteration` - The iteration being validated.
pub async fn run_validation<C, G>(
    step: &mut C,
    params: &[f32],
    setup: ValidationSetup<'_>,
    group: &mut G,
    iteration: u64,
) -> Result<ValidationOutcome>
where
    C: ComputeStep,
    G: ProcessGroup,
{
    let start = Instant::now();

    let records = {
        let mut step = EvalMode::enter(step);
        evaluate_shard(&mut *step, params, setup, iteration)
    };
    step.release_caches();
    let records = records?;
    ensure_finite(&records)?;

    let local_samples = records.len();
    debug!(iteration, samples = local_samples; "validation shard evaluated");

    let gathered = group
        .gather_by_identity(records, setup.dataset.ids())
        .await?;

    let metric = match &gathered {
        Some(records) => aggregate(records, setup.target_metric)?,
        None => None,
    };

    Ok(ValidationOutcome {
        metric,
        records: gathered,
        local_samples,
        duration: start.elapsed(),
    })
}

fn evaluate_shard<C: ComputeStep>(
    step: &mut C,
    params: &[f32],
    setup: ValidationSetup<'_>,
    iteration: u64,
) -> Result<Vec<SampleRecord>> {
    let mut rng = rng_for(setup.seed, Stream::Validation, setup.shard.rank, iteration);
    let mut records = Vec::new();

    for batch in validation_batches(setup.dataset, setup.shard) {
        let start = Instant::now();

        let outputs = step
            .forward(params, &batch, &mut rng)
            .map_err(|source| TrainErr::Compute { iteration, source })?;

        let metrics = step.metrics(&outputs, &batch);
        let duration = start.elapsed().as_secs_f64();

        for (id, metrics) in batch.ids.into_iter().zip(metrics) {
            records.push(SampleRecord::new(id, metrics, duration));
        }
    }

    Ok(records)
}

/// Rejects local records that can't be gathered, JSON has no NaN nor infinities.
fn ensure_finite(records: &[SampleRecord]) -> Result<()> {
    for record in records {
        if let Some((name, &value)) = record.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TrainErr::NonFiniteMetric {
                name: name.clone(),
                value,
            });
        }
    }

    Ok(())
}

/// Averages `metric` over every record.
///
/// # Returns
/// `None` for an empty validation set.
///
/// # Errors
/// If a record lacks `metric` or holds a non finite value for it.
pub fn aggregate(records: &[SampleRecord], metric: &str) -> Result<Option<f32>> {
    if records.is_empty() {
        return Ok(None);
    }

    let mut sum = 0.0_f64;
    for record in records {
        let Some(&value) = record.metrics.get(metric) else {
            return Err(TrainErr::MissingMetric {
                name: metric.to_string(),
            });
        };

        if !value.is_finite() {
            return Err(TrainErr::NonFiniteMetric {
                name: metric.to_string(),
                value,
            });
        }

        sum += value as f64;
    }

    Ok(Some((sum / records.len() as f64) as f32))
}
