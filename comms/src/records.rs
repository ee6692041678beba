use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Named scalar losses, ordered by name so every process walks them identically.
pub type LossMap = BTreeMap<String, f32>;

/// Stable identity of a single sample, independent of which process produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The metrics computed for one validation sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: SampleId,
    pub metrics: BTreeMap<String, f32>,
    /// Wall time spent on this sample, in seconds.
    pub duration: f64,
}

impl SampleRecord {
    pub fn new(id: SampleId, metrics: BTreeMap<String, f32>, duration: f64) -> Self {
        Self {
            id,
            metrics,
            duration,
        }
    }
}
