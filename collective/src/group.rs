use comms::{LossMap, SampleId, SampleRecord};

use crate::Result;

/// The rank that checkpoints, logs aggregates and decides early stop.
pub const COORDINATOR_RANK: usize = 0;

/// Where the result of an average-reduce is made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceTarget {
    /// Every process receives the averaged losses.
    All,
    /// Only the coordinator receives them, the rest get `None`.
    Coordinator,
}

/// The collective operations the training controller synchronizes on.
///
/// Every process must call the same operations in the same order, otherwise
/// the group deadlocks. None of these may be skipped based on locally computed data.
#[allow(unused)]
#[trait_variant::make(ProcessGroup: Send)]
pub trait ProcessGroupTemplate {
    /// Returns this process' rank.
    fn rank(&self) -> usize;

    /// Returns the amount of processes in the group.
    fn world_size(&self) -> usize;

    /// Averages named scalar losses across every process.
    ///
    /// # Arguments
    /// * `losses` - This process' losses, every process must report the same names.
    /// * `target` - Which processes receive the result.
    ///
    /// # Returns
    /// The averaged losses, or `None` on processes that are not a target.
    async fn average_reduce(
        &mut self,
        losses: &LossMap,
        target: ReduceTarget,
    ) -> Result<Option<LossMap>>;

    /// Collects every process' per-sample records onto the coordinator.
    ///
    /// # Arguments
    /// * `records` - The records produced by this process.
    /// * `canonical` - The identity order the gathered records must follow.
    ///
    /// # Returns
    /// The reordered records on the coordinator, `None` elsewhere.
    ///
    /// # Errors
    /// A gathered count different from `canonical.len()` is fatal.
    async fn gather_by_identity(
        &mut self,
        records: Vec<SampleRecord>,
        canonical: &[SampleId],
    ) -> Result<Option<Vec<SampleRecord>>>;

    /// Replicates the coordinator's `flag` on every process.
    ///
    /// # Arguments
    /// * `flag` - The value to broadcast, ignored on non-coordinators.
    async fn broadcast_flag(&mut self, flag: bool) -> Result<bool>;

    /// Waits until every process reaches this call.
    async fn barrier(&mut self) -> Result<()>;

    /// Tells every reachable process that this one is going down.
    ///
    /// Best effort, send failures are ignored.
    async fn abort(&mut self, detail: &str);
}
