use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::EtlResult;
use crate::state::checkpoint::{Checkpoint, validate_checkpoint_update};
use crate::store::checkpoint::CheckpointStore;
use crate::types::SourceTableId;

#[derive(Debug, Default)]
struct Inner {
    checkpoints: BTreeMap<SourceTableId, Checkpoint>,
    /// Every saved checkpoint per table, in save order.
    history: HashMap<SourceTableId, Vec<Checkpoint>>,
}

/// Checkpoint store keeping everything in memory.
///
/// The lock is only held for map operations, so tables do not wait on each other's I/O.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all checkpoints saved for `table_id`, oldest first.
    pub async fn checkpoint_history(&self, table_id: &SourceTableId) -> Vec<Checkpoint> {
        let inner = self.inner.lock().await;
        inner.history.get(table_id).cloned().unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn name() -> &'static str {
        "memory"
    }

    async fn get_checkpoint(&self, table_id: &SourceTableId) -> EtlResult<Option<Checkpoint>> {
        let inner = self.inner.lock().await;

        Ok(inner.checkpoints.get(table_id).cloned())
    }

    async fn save_checkpoint(
        &self,
        table_id: &SourceTableId,
        checkpoint: &Checkpoint,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        validate_checkpoint_update(inner.checkpoints.get(table_id), checkpoint)?;

        inner
            .checkpoints
            .insert(table_id.clone(), checkpoint.clone());
        inner
            .history
            .entry(table_id.clone())
            .or_default()
            .push(checkpoint.clone());

        Ok(())
    }

    async fn list_tracked_tables(&self) -> EtlResult<Vec<SourceTableId>> {
        let inner = self.inner.lock().await;

        Ok(inner.checkpoints.keys().cloned().collect())
    }
}
