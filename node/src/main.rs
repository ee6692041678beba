mod dataset;

use std::{env, path::Path, process::ExitCode};

use anyhow::{Context, Result, bail};
use collective::{ProcessGroup, Solo, rendezvous};
use log::{error, info, warn};
use tokio::signal;
use trainer::{
    ComputeStep, LinearRegression, RunContext, RunSummary, TrainingConfig, TrainingLoop,
    TrainingState, optimization::Optimizer,
};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: &str = "29500";

const ACCURACY_TOLERANCE: f32 = 0.1;
const SYNTHETIC_TRAIN_SAMPLES: usize = 1024;
const SYNTHETIC_VALIDATION_SAMPLES: usize = 128;

const USAGE: &str = "usage: node <config.json> [<train.json> <validation.json>]";

enum Outcome {
    Finished(RunSummary),
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run().await {
        Ok(Outcome::Finished(summary)) => {
            info!(
                final_iteration = summary.final_iteration, reason:% = summary.stop_reason;
                "training finished"
            );
            ExitCode::SUCCESS
        }
        Ok(Outcome::Interrupted) => {
            warn!("interrupted, exiting without synchronizing");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<Outcome> {
    let mut args = env::args().skip(1);
    let Some(config_path) = args.next() else {
        bail!(USAGE);
    };

    let cfg = TrainingConfig::from_path(&config_path)
        .with_context(|| format!("couldn't load {config_path}"))?;
    let cadence = cfg.validate()?;
    let ctx = RunContext::from_env()?;

    let (train_set, validation_set) = match (args.next(), args.next()) {
        (Some(train), Some(validation)) => (
            dataset::load(Path::new(&train), "train")?,
            dataset::load(Path::new(&validation), "val")?,
        ),
        (None, None) => {
            info!("no datasets given, sampling synthetic ones");
            (
                dataset::synthetic("train", SYNTHETIC_TRAIN_SAMPLES, cfg.seed, 0),
                dataset::synthetic("val", SYNTHETIC_VALIDATION_SAMPLES, cfg.seed, 1),
            )
        }
        _ => bail!(USAGE),
    };

    let model = LinearRegression::new(ACCURACY_TOLERANCE);
    let params = model.init_params(cfg.seed);
    let optimizer = cfg.optimizer.build(params.len(), cfg.base_lr as f32);
    let state = TrainingState::new(params, optimizer, cfg.weight_averager());

    let mut tl = TrainingLoop::new(&cfg, cadence, ctx, model, state, train_set, validation_set)?;

    if !ctx.is_distributed() {
        return drive(&mut tl, &mut Solo::new()).await;
    }

    let addr = format!(
        "{}:{}",
        env::var("MASTER_ADDR").unwrap_or_else(|_| DEFAULT_MASTER_ADDR.to_string()),
        env::var("MASTER_PORT").unwrap_or_else(|_| DEFAULT_MASTER_PORT.to_string()),
    );

    let mut group = rendezvous(ctx.rank(), ctx.world_size(), &addr)
        .await
        .with_context(|| format!("rendezvous at {addr} failed"))?;

    let outcome = drive(&mut tl, &mut group).await?;

    if let Outcome::Finished(_) = outcome {
        group.disconnect().await.context("disconnecting from the group")?;
    }

    Ok(outcome)
}

/// Races the training loop against an interrupt.
///
/// On interrupt the loop is dropped where it stands, no collective is called again.
async fn drive<C, O, G>(tl: &mut TrainingLoop<C, O>, group: &mut G) -> Result<Outcome>
where
    C: ComputeStep,
    O: Optimizer,
    G: ProcessGroup,
{
    tokio::select! {
        ret = tl.run(group) => Ok(Outcome::Finished(ret?)),
        _ = signal::ctrl_c() => Ok(Outcome::Interrupted),
    }
}
