use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Whether a larger or a smaller validation metric is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    #[default]
    Higher,
    Lower,
}

impl MetricDirection {
    /// Returns `true` if `metric` reached `target` in this direction.
    pub fn reached(self, metric: f32, target: f32) -> bool {
        match self {
            MetricDirection::Higher => metric >= target,
            MetricDirection::Lower => metric <= target,
        }
    }

    /// Orders two metrics so that the better one comes first.
    fn best_first(self, a: f32, b: f32) -> std::cmp::Ordering {
        match self {
            MetricDirection::Higher => b.total_cmp(&a),
            MetricDirection::Lower => a.total_cmp(&b),
        }
    }
}

/// Which checkpoints survive a retention pass.
///
/// With every knob at zero nothing is ever deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: usize,
    pub keep_best: usize,
    pub keep_validation: bool,
    pub direction: MetricDirection,
}

impl RetentionPolicy {
    pub fn keeps_everything(&self) -> bool {
        self.keep_last == 0 && self.keep_best == 0 && !self.keep_validation
    }
}

/// What retention needs to know about a checkpoint on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointEntry {
    pub iteration: u64,
    pub validation_metric: Option<f32>,
    pub is_validation: bool,
}

/// Returns the iterations of the `keep_best` best checkpoints in `existing`.
///
/// Only checkpoints carrying a metric compete, ties go to the earliest iteration.
pub fn best(existing: &[CheckpointEntry], policy: &RetentionPolicy) -> Vec<u64> {
    let mut scored: Vec<_> = existing
        .iter()
        .filter_map(|e| e.validation_metric.map(|m| (m, e.iteration)))
        .collect();

    scored.sort_by(|(ma, ia), (mb, ib)| {
        policy
            .direction
            .best_first(*ma, *mb)
            .then_with(|| ia.cmp(ib))
    });

    scored
        .into_iter()
        .take(policy.keep_best)
        .map(|(_, iteration)| iteration)
        .collect()
}

/// Returns the iterations of the checkpoints that survive `policy`.
pub fn retained(existing: &[CheckpointEntry], policy: &RetentionPolicy) -> BTreeSet<u64> {
    let mut keep: BTreeSet<u64> = BTreeSet::new();

    if policy.keeps_everything() {
        keep.extend(existing.iter().map(|e| e.iteration));
        return keep;
    }

    let mut newest_first: Vec<u64> = existing.iter().map(|e| e.iteration).collect();
    newest_first.sort_unstable_by(|a, b| b.cmp(a));

    // The newest one always survives, whatever the knobs say.
    keep.extend(newest_first.iter().take(policy.keep_last.max(1)));
    keep.extend(best(existing, policy));

    if policy.keep_validation {
        keep.extend(existing.iter().filter(|e| e.is_validation).map(|e| e.iteration));
    }

    keep
}

/// Returns the iterations of the checkpoints `policy` drops, oldest first.
pub fn to_delete(existing: &[CheckpointEntry], policy: &RetentionPolicy) -> Vec<u64> {
    let keep = retained(existing, policy);

    let mut drop: Vec<u64> = existing
        .iter()
        .map(|e| e.iteration)
        .filter(|i| !keep.contains(i))
        .collect();

    drop.sort_unstable();
    drop.dedup();
    drop
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(metric: impl Fn(u64) -> f32) -> Vec<CheckpointEntry> {
        (1..=10)
            .map(|k| {
                let iteration = k * 10;
                CheckpointEntry {
                    iteration,
                    validation_metric: Some(metric(iteration)),
                    is_validation: true,
                }
            })
            .collect()
    }

    fn policy(keep_last: usize, keep_best: usize, direction: MetricDirection) -> RetentionPolicy {
        RetentionPolicy {
            keep_last,
            keep_best,
            keep_validation: false,
            direction,
        }
    }

    #[test]
    fn improving_metric_keeps_the_newest_two() {
        let existing = entries(|i| i as f32 / 100.);
        let policy = policy(2, 1, MetricDirection::Higher);

        assert_eq!(retained(&existing, &policy), BTreeSet::from([90, 100]));
        assert_eq!(to_delete(&existing, &policy), vec![10, 20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn an_old_best_survives_next_to_the_newest() {
        let existing = entries(|i| i as f32 / 100.);
        let policy = policy(2, 1, MetricDirection::Lower);

        assert_eq!(retained(&existing, &policy), BTreeSet::from([10, 90, 100]));
    }

    #[test]
    fn metric_ties_go_to_the_earliest() {
        let existing = entries(|i| if i == 30 || i == 60 { 0.9 } else { 0.1 });
        let policy = policy(1, 1, MetricDirection::Higher);

        assert_eq!(best(&existing, &policy), vec![30]);
        assert_eq!(retained(&existing, &policy), BTreeSet::from([30, 100]));
    }

    #[test]
    fn validation_tags_and_defaults() {
        let mut existing = entries(|_| 0.5);
        for e in existing.iter_mut().filter(|e| e.iteration % 40 != 0) {
            e.is_validation = false;
            e.validation_metric = None;
        }

        let keep_val = RetentionPolicy {
            keep_validation: true,
            ..Default::default()
        };
        assert_eq!(retained(&existing, &keep_val), BTreeSet::from([40, 80, 100]));

        assert!(to_delete(&existing, &RetentionPolicy::default()).is_empty());
    }
}
