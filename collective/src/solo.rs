use comms::{LossMap, SampleId, SampleRecord};

use crate::{ProcessGroup, ReduceTarget, Result, ordering::order_by_identity};

/// The process group of a run without a distributed context.
///
/// Every collective degrades to the identity with no synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct Solo;

impl Solo {
    /// Creates a new `Solo` group.
    ///
    /// # Returns
    /// A new `Solo` instance.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessGroup for Solo {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    async fn average_reduce(
        &mut self,
        losses: &LossMap,
        _target: ReduceTarget,
    ) -> Result<Option<LossMap>> {
        Ok(Some(losses.clone()))
    }

    async fn gather_by_identity(
        &mut self,
        records: Vec<SampleRecord>,
        canonical: &[SampleId],
    ) -> Result<Option<Vec<SampleRecord>>> {
        order_by_identity(records, canonical).map(Some)
    }

    async fn broadcast_flag(&mut self, flag: bool) -> Result<bool> {
        Ok(flag)
    }

    async fn barrier(&mut self) -> Result<()> {
        Ok(())
    }

    async fn abort(&mut self, _detail: &str) {}
}
