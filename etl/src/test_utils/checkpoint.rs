use crate::error::{ErrorKind, EtlResult};
use crate::state::checkpoint::Checkpoint;
use crate::store::checkpoint::CheckpointStore;
use crate::test_utils::faults::FaultInjector;
use crate::types::SourceTableId;

/// [`CheckpointStore`] that fails saves on demand.
#[derive(Debug, Clone)]
pub struct FaultyCheckpointStore<C> {
    inner: C,
    saves: FaultInjector,
}

impl<C> FaultyCheckpointStore<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            saves: FaultInjector::new(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn save_faults(&self) -> &FaultInjector {
        &self.saves
    }
}

impl<C> CheckpointStore for FaultyCheckpointStore<C>
where
    C: CheckpointStore + Sync,
{
    fn name() -> &'static str {
        "faulty"
    }

    async fn get_checkpoint(&self, table_id: &SourceTableId) -> EtlResult<Option<Checkpoint>> {
        self.inner.get_checkpoint(table_id).await
    }

    async fn save_checkpoint(
        &self,
        table_id: &SourceTableId,
        checkpoint: &Checkpoint,
    ) -> EtlResult<()> {
        self.saves
            .check(ErrorKind::CheckpointSaveFailed, "checkpoint save")?;
        self.inner.save_checkpoint(table_id, checkpoint).await
    }

    async fn list_tracked_tables(&self) -> EtlResult<Vec<SourceTableId>> {
        self.inner.list_tracked_tables().await
    }
}
