mod common;

use std::fs;

use collective::Solo;
use trainer::{
    LoopEvent, OptimizerConfig, Phase, RunContext, StopReason,
    checkpoint::{CheckpointManager, RetentionPolicy, read_meta},
};

#[tokio::test]
async fn groups_validations_and_checkpoints_follow_the_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = common::config(dir.path());

    let mut tl = common::training_loop(&cfg, RunContext::single());
    let summary = tl.run(&mut Solo::new()).await.unwrap();

    assert_eq!(tl.phase(), Phase::Stopped);
    assert_eq!(summary.start_iteration, 1);
    assert_eq!(summary.final_iteration, 8);
    assert_eq!(summary.stop_reason, StopReason::Completed);

    let m = &summary.metrics;
    assert_eq!(m.iterations, 8);
    assert_eq!(m.optimizer_steps, 4);
    assert_eq!(m.steps_before_first_validation(), Some(2));
    assert_eq!(m.validations, 2);
    assert_eq!(m.checkpoints, 2);

    let at = |i: u64| -> Vec<LoopEvent> {
        m.events
            .iter()
            .copied()
            .filter(|e| match *e {
                LoopEvent::OptimizerStep { iteration, .. }
                | LoopEvent::Validation { iteration, .. }
                | LoopEvent::Checkpoint { iteration } => iteration == i,
            })
            .collect()
    };

    for i in [4, 8] {
        let events = at(i);
        assert_eq!(events.len(), 3, "{events:?}");
        assert!(matches!(events[1], LoopEvent::Validation { metric: Some(_), .. }));
        assert!(matches!(events[2], LoopEvent::Checkpoint { .. }));
    }

    let manager = CheckpointManager::new(cfg.checkpoints_dir(), RetentionPolicy::default());
    let saved: Vec<u64> = manager.list().unwrap().into_iter().map(|(i, _)| i).collect();
    assert_eq!(saved, vec![4, 8]);

    let meta = read_meta(&manager.path_for(8)).unwrap();
    assert!(meta.is_validation);
    assert_eq!(meta.validation_metric, summary.last_metric);
}

#[tokio::test]
async fn logs_are_written_at_the_log_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::config(dir.path());
    cfg.save_process_logs = true;

    let mut tl = common::training_loop(&cfg, RunContext::single());
    tl.run(&mut Solo::new()).await.unwrap();

    let lines = |name: &str| -> Vec<serde_json::Value> {
        fs::read_to_string(cfg.logs_dir().join(name))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    };

    let training = lines("training.log");
    let iterations: Vec<u64> = training.iter().map(|r| r["iteration"].as_u64().unwrap()).collect();
    assert_eq!(iterations, vec![2, 4, 6, 8]);
    assert_eq!(training[0]["num_accumulated_iters"], 2);
    assert_eq!(training[0]["global_batch_size"], 2);
    assert!(training[0]["losses_avg"]["mse"].is_f64());

    let validation = lines("validation.log");
    assert_eq!(validation.len(), 2);
    assert_eq!(validation[1]["size"], 8);
    assert_eq!(validation[1]["metric_name"], "accuracy");
    assert_eq!(validation[1]["metrics_list"][0]["id"], "val_000000");

    assert_eq!(lines("rank0.log").len(), 8);
}

#[tokio::test]
async fn disabled_logging_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::config(dir.path());
    cfg.log_every = 0;
    cfg.save_process_logs = true;

    let mut tl = common::training_loop(&cfg, RunContext::single());
    tl.run(&mut Solo::new()).await.unwrap();

    assert!(!cfg.logs_dir().exists());
}

#[tokio::test]
async fn reaching_the_target_stops_after_checkpointing() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::config(dir.path());
    cfg.target_value = 0.0;

    let mut tl = common::training_loop(&cfg, RunContext::single());
    let summary = tl.run(&mut Solo::new()).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::TargetReached);
    assert_eq!(summary.final_iteration, 4);
    assert_eq!(summary.metrics.checkpoints, 1);
    assert_eq!(tl.state().iteration, 4);
}

#[tokio::test]
async fn training_reduces_the_loss() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = common::config(dir.path());
    cfg.train_iters = 400;
    cfg.val_every = 400;
    cfg.checkpoint_every = 0;
    cfg.log_every = 0;
    cfg.max_grad_norm = None;
    cfg.optimizer = OptimizerConfig::GradientDescent;
    cfg.base_lr = 0.1;
    cfg.target_value = 0.9;

    let mut tl = common::training_loop(&cfg, RunContext::single());
    let summary = tl.run(&mut Solo::new()).await.unwrap();

    let params = &tl.state().params;
    assert!((params[0] - 2.0).abs() < 0.2, "{params:?}");
    assert!((params[1] - 1.0).abs() < 0.2, "{params:?}");
    assert_eq!(summary.stop_reason, StopReason::TargetReached);
}
