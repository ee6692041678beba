#![allow(dead_code)]

use std::path::Path;

use trainer::{
    LinearRegression, PrecisionMode, RunContext, TrainingConfig, TrainingLoop, TrainingState,
    data::InMemoryDataset,
    optimization::AnyOptimizer,
};

pub type LinRegLoop = TrainingLoop<LinearRegression, AnyOptimizer>;

/// Samples of y = 2x + 1.
pub fn line(prefix: &str, n: usize, offset: f32) -> InMemoryDataset {
    let xs: Vec<f32> = (0..n).map(|i| offset + i as f32 / n as f32).collect();
    let ys = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    InMemoryDataset::from_xy(prefix, xs, ys)
}

/// 8 iterations in groups of 2, validating and checkpointing every 4.
///
/// The default target can't be reached, accuracy never exceeds 1.
pub fn config(dir: &Path) -> TrainingConfig {
    TrainingConfig {
        training_dirpath: dir.to_path_buf(),
        train_iters: 8,
        accumulation_iters: 2,
        val_every: 4,
        checkpoint_every: 4,
        log_every: 2,
        local_batch_size: 2,
        precision: PrecisionMode::Fp32,
        base_lr: 0.05,
        target_value: 2.0,
        ..Default::default()
    }
}

pub fn training_loop(cfg: &TrainingConfig, ctx: RunContext) -> LinRegLoop {
    let cadence = cfg.validate().unwrap();

    let model = LinearRegression::new(0.5);
    let params = model.init_params(cfg.seed);
    let optimizer = cfg.optimizer.build(params.len(), cfg.base_lr as f32);
    let state = TrainingState::new(params, optimizer, cfg.weight_averager());

    TrainingLoop::new(
        cfg,
        cadence,
        ctx,
        model,
        state,
        line("train", 32, 0.0),
        line("val", 8, 0.03),
    )
    .unwrap()
}
