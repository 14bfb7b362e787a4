use std::future::Future;

use crate::error::EtlResult;
use crate::state::checkpoint::Checkpoint;
use crate::types::SourceTableId;

/// Durable key-value store of [`Checkpoint`]s keyed by source table.
///
/// Saves must be atomic: a reader sees either the previous or the new checkpoint, never a
/// mix. Saves for the same table are serialized while different tables never wait on each
/// other. Every implementation rejects a save that moves the high watermark backwards with
/// [`crate::error::ErrorKind::InvalidState`].
pub trait CheckpointStore {
    /// Returns the name of the store kind.
    fn name() -> &'static str;

    /// Returns the stored checkpoint of `table_id`, if any.
    fn get_checkpoint(
        &self,
        table_id: &SourceTableId,
    ) -> impl Future<Output = EtlResult<Option<Checkpoint>>> + Send;

    /// Replaces the checkpoint of `table_id`.
    fn save_checkpoint(
        &self,
        table_id: &SourceTableId,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Returns the ids of all tables with a stored checkpoint, sorted.
    fn list_tracked_tables(&self) -> impl Future<Output = EtlResult<Vec<SourceTableId>>> + Send;
}
