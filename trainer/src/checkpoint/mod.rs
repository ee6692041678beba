mod artifact;
mod retention;

use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

pub use artifact::{Checkpoint, CheckpointMeta, decode, encode, read_meta};
pub use retention::{CheckpointEntry, MetricDirection, RetentionPolicy, best, retained, to_delete};

use crate::{
    cadence::Cadence,
    error::{CheckpointErr, Result, TrainErr},
    optimization::{Optimizer, SizeMismatchErr},
    state::TrainingState,
};

const EXTENSION: &str = "safetensors";

/// Writes, prunes and restores the checkpoints of a run.
///
/// Every file lives flat in one directory and is named after its iteration.
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    policy: RetentionPolicy,
    pending_deletions: BTreeSet<PathBuf>,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager`.
    ///
    /// # Arguments
    /// * `dir` - The checkpoints directory, created on the first save.
    /// * `policy` - Which checkpoints survive after every save.
    pub fn new(dir: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
            pending_deletions: BTreeSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path of the checkpoint of `iteration`.
    pub fn path_for(&self, iteration: u64) -> PathBuf {
        self.dir.join(format!("{iteration:06}.{EXTENSION}"))
    }

    fn temp_path_for(&self, iteration: u64) -> PathBuf {
        self.dir.join(format!(".{iteration:06}.{EXTENSION}.tmp"))
    }

    /// Persists `state` as the checkpoint of `iteration` and applies retention.
    ///
    /// The file is written aside, synced and then renamed into place, so a
    /// crash never leaves a partial checkpoint under a valid name.
    ///
    /// # Arguments
    /// * `state` - The state to persist.
    /// * `iteration` - The iteration that just completed.
    /// * `validation_metric` - The aggregate metric, if this iteration validated.
    /// * `is_validation` - Whether this iteration validated.
    ///
    /// # Returns
    /// The path of the new checkpoint.
    pub fn save<O: Optimizer>(
        &mut self,
        state: &TrainingState<O>,
        iteration: u64,
        validation_metric: Option<f32>,
        is_validation: bool,
    ) -> std::result::Result<PathBuf, CheckpointErr> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointErr::Io {
            path: self.dir.clone(),
            source,
        })?;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let meta = CheckpointMeta {
            iteration,
            validation_metric,
            is_validation,
            created_at,
        };

        let path = self.path_for(iteration);
        let temp = self.temp_path_for(iteration);

        let optimizer = state.optimizer.state();
        let bytes = encode(
            &meta,
            &state.params,
            &optimizer,
            state.averager.export(),
            &path,
        )?;

        if let Err(e) = write_then_rename(&temp, &path, &bytes) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        // Makes the rename itself durable. Not every platform can open a directory.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        info!(iteration, bytes = bytes.len(); "checkpoint saved");

        if let Err(e) = self.apply_retention() {
            warn!(iteration; "retention pass failed: {e}");
        }

        Ok(path)
    }

    /// Lists the checkpoints in the directory, sorted by iteration.
    ///
    /// Temporary files and anything not named after an iteration are ignored.
    pub fn list(&self) -> std::result::Result<Vec<(u64, PathBuf)>, CheckpointErr> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointErr::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CheckpointErr::Io {
                path: self.dir.clone(),
                source,
            })?;

            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }

            let Some(iteration) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
            else {
                continue;
            };

            found.push((iteration, path));
        }

        found.sort_unstable_by_key(|(iteration, _)| *iteration);
        Ok(found)
    }

    /// Reads the retention relevant tags of every checkpoint in the directory.
    ///
    /// Checkpoints whose tags can't be read are left out, and so never deleted.
    pub fn entries(&self) -> std::result::Result<Vec<CheckpointEntry>, CheckpointErr> {
        let mut entries = Vec::new();

        for (_, path) in self.list()? {
            match read_meta(&path) {
                Ok(meta) => entries.push(CheckpointEntry {
                    iteration: meta.iteration,
                    validation_metric: meta.validation_metric,
                    is_validation: meta.is_validation,
                }),
                Err(e) => warn!(path:? = path; "skipping unreadable checkpoint: {e}"),
            }
        }

        Ok(entries)
    }

    /// Deletes the checkpoints the retention policy drops.
    ///
    /// Deletions that failed on an earlier pass are retried first, and temp
    /// files a crashed save left behind are swept. A failed deletion is logged
    /// and remembered, never returned as an error.
    ///
    /// # Returns
    /// The iterations deleted in this pass.
    pub fn apply_retention(&mut self) -> std::result::Result<Vec<u64>, CheckpointErr> {
        let pending = std::mem::take(&mut self.pending_deletions);
        for path in pending {
            self.delete(&path);
        }

        for path in self.stale_temp_files() {
            self.delete(&path);
        }

        if self.policy.keeps_everything() {
            return Ok(Vec::new());
        }

        let existing = self.entries()?;
        let best = best(&existing, &self.policy);
        let mut deleted = Vec::new();

        for iteration in to_delete(&existing, &self.policy) {
            let path = self.path_for(iteration);
            if self.delete(&path) {
                deleted.push(iteration);
            }
        }

        if !deleted.is_empty() {
            debug!(deleted:? = deleted, best:? = best; "retention pass");
        }

        Ok(deleted)
    }

    /// Saves run one at a time, so any temp file found here is a leftover.
    fn stale_temp_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
            })
            .collect()
    }

    fn delete(&mut self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path:? = path; "couldn't delete checkpoint, retrying on the next pass: {e}");
                self.pending_deletions.insert(path.to_path_buf());
                false
            }
        }
    }

    /// Restores `state` from the newest checkpoint in the directory.
    ///
    /// # Returns
    /// The restored iteration, 0 with `state` untouched if there is no checkpoint.
    ///
    /// # Errors
    /// If the newest checkpoint can't be read, doesn't fit the model, or its
    /// iteration isn't the end of an accumulation group.
    pub fn resume_latest<O: Optimizer>(
        &self,
        state: &mut TrainingState<O>,
        cadence: &Cadence,
    ) -> Result<u64> {
        let Some((iteration, path)) = self.list()?.pop() else {
            info!(dir:? = self.dir; "no checkpoint to resume from");
            return Ok(0);
        };

        if !cadence.is_resumable(iteration) {
            return Err(TrainErr::MisalignedResume {
                iteration,
                accumulation_iters: cadence.accumulation_iters(),
            });
        }

        let ckpt = load(&path)?;
        if ckpt.meta.iteration != iteration {
            return Err(CheckpointErr::Format {
                path,
                reason: format!("holds iteration {}", ckpt.meta.iteration),
            }
            .into());
        }

        if let Some(averaged) = &ckpt.averaged
            && averaged.len() != state.params.len()
        {
            return Err(CheckpointErr::from(SizeMismatchErr {
                what: "averaged parameters",
                got: averaged.len(),
                expected: state.params.len(),
            })
            .into());
        }

        restore_params(&mut state.params, &ckpt.model)?;
        state
            .optimizer
            .load_state(&ckpt.optimizer)
            .map_err(CheckpointErr::from)?;

        if let Some(averaged) = &ckpt.averaged {
            state.averager.restore(averaged);
        }

        state.iteration = iteration;
        info!(iteration, path:? = path; "resumed from checkpoint");
        Ok(iteration)
    }
}

/// Initializes `state` from an arbitrary checkpoint file before resuming.
///
/// Loads the model parameters, and the optimizer state when the file has one.
pub fn initialize_from<O: Optimizer>(
    path: &Path,
    state: &mut TrainingState<O>,
) -> std::result::Result<(), CheckpointErr> {
    let bytes = fs::read(path).map_err(|source| CheckpointErr::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let digest = hex::encode(Sha256::digest(&bytes));
    info!(path:? = path, sha256 = digest.as_str(); "initializing parameters");

    let ckpt = decode(&bytes, path)?;
    restore_params(&mut state.params, &ckpt.model)?;

    if !ckpt.optimizer.is_empty() {
        state.optimizer.load_state(&ckpt.optimizer)?;
    }

    Ok(())
}

/// Writes `bytes` aside at `temp`, syncs them and moves them to `path`.
fn write_then_rename(temp: &Path, path: &Path, bytes: &[u8]) -> std::result::Result<(), CheckpointErr> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| CheckpointErr::Io { path, source }
    };

    let mut file = File::create(temp).map_err(io_err(temp))?;
    file.write_all(bytes).map_err(io_err(temp))?;
    file.sync_all().map_err(io_err(temp))?;
    drop(file);

    fs::rename(temp, path).map_err(io_err(path))
}

fn load(path: &Path) -> std::result::Result<Checkpoint, CheckpointErr> {
    let bytes = fs::read(path).map_err(|source| CheckpointErr::Io {
        path: path.to_path_buf(),
        source,
    })?;

    decode(&bytes, path)
}

fn restore_params(params: &mut [f32], saved: &[f32]) -> std::result::Result<(), CheckpointErr> {
    if params.len() != saved.len() {
        return Err(SizeMismatchErr {
            what: "model parameters",
            got: saved.len(),
            expected: params.len(),
        }
        .into());
    }

    params.copy_from_slice(saved);
    Ok(())
}
