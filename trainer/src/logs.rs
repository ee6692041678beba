use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use comms::{LossMap, SampleId, SampleRecord};
use log::warn;
use serde::Serialize;

use crate::{cadence::Cadence, context::RunContext};

/// Seconds since the unix epoch.
pub fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// One line of the training log, written at the end of every accumulation group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingRecord {
    pub iteration: u64,
    pub global_batch_size: usize,
    pub num_accumulated_iters: u64,
    pub timestamp: f64,
    /// Losses averaged over the group and every process.
    pub losses_avg: LossMap,
    pub duration: f64,
}

/// One line of the validation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRecord {
    pub iteration: u64,
    pub metric_name: String,
    pub metric: f32,
    pub timestamp: f64,
    pub duration: f64,
    pub size: usize,
    /// Samples per second.
    pub throughput: f64,
    pub metrics_list: Vec<SampleRecord>,
}

/// One line of a per-process log, written for every iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub iteration: u64,
    pub sample_ids: Vec<SampleId>,
    pub timestamp: f64,
    pub losses: LossMap,
    pub duration: f64,
}

/// A buffered JSON lines file, opened in append mode on every flush.
///
/// Lines that couldn't be written stay buffered for the next flush.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    pending: Vec<String>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The amount of lines waiting for a flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Buffers `record` as a new line.
    pub fn push<R: Serialize>(&mut self, record: &R) {
        match serde_json::to_string(record) {
            Ok(line) => self.pending.push(line),
            Err(e) => warn!(path:? = self.path; "dropping unserializable log record: {e}"),
        }
    }

    /// Appends every buffered line to the file.
    ///
    /// # Returns
    /// `true` if nothing is left buffered.
    pub fn flush(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }

        let mut buf = String::new();
        for line in &self.pending {
            buf.push_str(line);
            buf.push('\n');
        }

        match self.append(buf.as_bytes()) {
            Ok(()) => {
                self.pending.clear();
                true
            }
            Err(e) => {
                warn!(
                    path:? = self.path, pending = self.pending.len();
                    "couldn't append log records, retrying on the next flush: {e}"
                );
                false
            }
        }
    }

    fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.write_all(bytes)
    }
}

/// Every log file a process writes.
///
/// The coordinator owns the training and validation logs, every process owns
/// its process log when enabled. Nothing is written when logging is off.
#[derive(Debug, Default)]
pub struct RunLogs {
    training: Option<LogSink>,
    validation: Option<LogSink>,
    process: Option<LogSink>,
}

impl RunLogs {
    /// Creates the logs of this process.
    ///
    /// # Arguments
    /// * `dir` - The directory every log file lives in.
    /// * `ctx` - Where this process sits within the run.
    /// * `cadence` - Whether logging is enabled at all.
    /// * `save_process_logs` - Whether to write the per-process log.
    pub fn new(dir: &Path, ctx: &RunContext, cadence: &Cadence, save_process_logs: bool) -> Self {
        if !cadence.logging_enabled() {
            return Self::disabled();
        }

        let coordinator = ctx.is_coordinator();
        Self {
            training: coordinator.then(|| LogSink::new(dir.join("training.log"))),
            validation: coordinator.then(|| LogSink::new(dir.join("validation.log"))),
            process: save_process_logs
                .then(|| LogSink::new(dir.join(format!("{}.log", ctx.process_name())))),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn training(&mut self, record: &TrainingRecord) {
        if let Some(sink) = &mut self.training {
            sink.push(record);
        }
    }

    pub fn process(&mut self, record: &ProcessRecord) {
        if let Some(sink) = &mut self.process {
            sink.push(record);
        }
    }

    /// Writes `record` right away.
    pub fn validation(&mut self, record: &ValidationRecord) {
        if let Some(sink) = &mut self.validation {
            sink.push(record);
            sink.flush();
        }
    }

    pub fn wants_process_records(&self) -> bool {
        self.process.is_some()
    }

    /// Flushes the buffered training and process records.
    pub fn flush(&mut self) {
        let Self {
            training,
            validation,
            process,
        } = self;

        for sink in [training, validation, process].into_iter().flatten() {
            sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_lines_are_appended_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = LogSink::new(dir.path().join("logs").join("training.log"));

        for iteration in 1..=3 {
            sink.push(&ProcessRecord {
                iteration,
                sample_ids: vec![SampleId::new(format!("s{iteration}"))],
                timestamp: 0.0,
                losses: LossMap::from([("mse".to_string(), 0.5)]),
                duration: 0.25,
            });
        }

        assert!(!sink.path().exists());
        assert!(sink.flush());
        assert!(sink.flush());

        let content = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["iteration"], 3);
        assert_eq!(lines[0]["sample_ids"][0], "s1");
        assert_eq!(lines[1]["losses"]["mse"], 0.5);
    }

    #[test]
    fn failed_appends_stay_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();

        let mut sink = LogSink::new(blocker.join("training.log"));
        sink.push(&serde_json::json!({ "iteration": 1 }));

        assert!(!sink.flush());
        assert_eq!(sink.pending(), 1);
    }
}
