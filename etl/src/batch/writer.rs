use chrono::{DateTime, Utc};
use tracing::info;

use crate::artifact::{ARTIFACT_EXTENSION, encode_events};
use crate::bail;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::storage::ObjectStore;
use crate::types::{Batch, BatchId, ChangeEvent, SourceTableRef, TokenRange};

fn path_segment(value: &str) -> String {
    value.replace(['/', '\\'], "_")
}

/// Returns the location of a batch artifact.
///
/// `{source}/{database}/{schema}/{table}/window=YYYY-MM-DD-HH/{batch_id}.parquet`. Ids are
/// unique per content, so two different batches never share a path.
pub fn artifact_path(table: &SourceTableRef, window: DateTime<Utc>, batch_id: BatchId) -> String {
    format!(
        "{}/{}/{}/{}/window={}/{batch_id}.{ARTIFACT_EXTENSION}",
        path_segment(&table.source_id),
        path_segment(&table.database),
        path_segment(&table.schema),
        path_segment(&table.table),
        window.format("%Y-%m-%d-%H"),
    )
}

/// Returns the prefix under which all artifacts of `table` are stored.
pub fn table_prefix(table: &SourceTableRef) -> String {
    format!(
        "{}/{}/{}/{}/",
        path_segment(&table.source_id),
        path_segment(&table.database),
        path_segment(&table.schema),
        path_segment(&table.table),
    )
}

fn write_failed(err: EtlError) -> EtlError {
    match err.kind() {
        ErrorKind::InvalidData | ErrorKind::InvalidState => err,
        _ => err.with_kind(ErrorKind::WriteFailed, "Batch artifact could not be written"),
    }
}

/// Serializes batches into artifacts and stores them.
#[derive(Debug, Clone)]
pub struct BatchWriter<O> {
    store: O,
}

impl<O> BatchWriter<O>
where
    O: ObjectStore,
{
    pub fn new(store: O) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    /// Writes `events` as one artifact and returns the [`Batch`] describing it.
    ///
    /// Retrying after a failure is safe: the same events map to the same path, and
    /// no other batch ever uses it. Store failures surface as [`ErrorKind::WriteFailed`].
    pub async fn write(&self, table: &SourceTableRef, events: &[ChangeEvent]) -> EtlResult<Batch> {
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            bail!(ErrorKind::InvalidState, "Cannot write an empty batch");
        };

        let table_id = table.id();
        let batch_id = BatchId::from_events(&table_id, events)?;
        let location = artifact_path(table, first.source_timestamp, batch_id);

        let bytes = encode_events(events)?;
        let size = bytes.len();
        self.store
            .put(&location, bytes)
            .await
            .map_err(write_failed)?;

        info!(
            %table_id,
            %batch_id,
            events = events.len(),
            size,
            location,
            "wrote batch artifact"
        );

        Ok(Batch::written(
            batch_id,
            table_id,
            TokenRange {
                min: first.token.clone(),
                max: last.token.clone(),
            },
            events.len(),
            location,
        ))
    }
}
