mod common;

use std::time::Duration;

use collective::{CollectiveErr, in_memory};
use futures::future;
use tokio::time::timeout;
use trainer::{RunContext, StopReason, TrainErr, TrainingConfig, checkpoint::RetentionPolicy};

const DEADLINE: Duration = Duration::from_secs(20);
const WORLD_SIZE: usize = 3;

async fn run_all(cfg: TrainingConfig) -> Vec<trainer::Result<trainer::RunSummary>> {
    let group = in_memory(WORLD_SIZE).await.unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .enumerate()
        .map(|(rank, mut member)| {
            let cfg = cfg.clone();
            tokio::spawn(async move {
                let ctx = RunContext::new(rank, WORLD_SIZE, rank, WORLD_SIZE).unwrap();
                let mut tl = common::training_loop(&cfg, ctx);
                let summary = tl.run(&mut member).await;
                member.disconnect().await.ok();
                summary
            })
        })
        .collect();

    timeout(DEADLINE, future::try_join_all(handles))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_rank_runs_to_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = common::config(dir.path());

    for summary in run_all(cfg.clone()).await {
        let summary = summary.unwrap();
        assert_eq!(summary.final_iteration, 8);
        assert_eq!(summary.stop_reason, StopReason::Completed);
        assert_eq!(summary.metrics.validations, 2);
    }

    let manager = trainer::CheckpointManager::new(cfg.checkpoints_dir(), RetentionPolicy::default());
    assert_eq!(manager.list().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_rank_stops_at_the_same_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::config(dir.path());
    cfg.target_value = 0.0;

    let summaries: Vec<_> = run_all(cfg)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for summary in &summaries {
        assert_eq!(summary.final_iteration, 4);
        assert_eq!(summary.stop_reason, StopReason::TargetReached);
    }

    // Only the coordinator aggregates.
    assert!(summaries[0].last_metric.is_some());
    assert!(summaries[1..].iter().all(|s| s.last_metric.is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_coordinator_failure_fails_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::config(dir.path());
    // Aggregation happens on the coordinator only, so only it fails first.
    cfg.target_metric = "missing".to_string();

    let results = run_all(cfg).await;

    assert!(matches!(results[0], Err(TrainErr::MissingMetric { .. })));
    for result in &results[1..] {
        assert!(matches!(
            result,
            Err(TrainErr::Collective(CollectiveErr::PeerFailed { rank: 0, .. }))
        ));
    }
}
