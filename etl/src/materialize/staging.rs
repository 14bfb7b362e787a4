use tracing::info;

use crate::destination::{ArtifactLocation, DestinationTables, Warehouse};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::state::checkpoint::Checkpoint;
use crate::types::{Batch, SourceTableRef};

fn staging_load_failed(err: EtlError) -> EtlError {
    match err.kind() {
        ErrorKind::InvalidData
        | ErrorKind::InvalidState
        | ErrorKind::ConfigError
        | ErrorKind::DeserializationError
        | ErrorKind::ArtifactReadFailed => err,
        _ => err.with_kind(
            ErrorKind::StagingLoadFailed,
            "Batch could not be loaded into staging",
        ),
    }
}

/// Outcome of a staging load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingLoad {
    Loaded { rows: u64 },
    /// The checkpoint's staging ledger shows the batch is already staged.
    AlreadyStaged,
}

/// Bulk loads batch artifacts into their table's staging area.
#[derive(Debug, Clone)]
pub struct StagingLoader<W> {
    warehouse: W,
}

impl<W> StagingLoader<W>
where
    W: Warehouse,
{
    pub fn new(warehouse: W) -> Self {
        Self { warehouse }
    }

    /// Loads `batch` into the staging table of `table` unless `checkpoint` records it as staged.
    ///
    /// Skipping is an optimization only, a duplicate load is absorbed by the merge.
    pub async fn load_to_staging(
        &self,
        table: &SourceTableRef,
        batch: &Batch,
        checkpoint: &Checkpoint,
    ) -> EtlResult<StagingLoad> {
        if checkpoint.is_staged(batch.id()) {
            info!(batch_id = %batch.id(), "batch already staged, skipping load");
            return Ok(StagingLoad::AlreadyStaged);
        }

        let tables = DestinationTables::for_table(table);
        let artifact = ArtifactLocation {
            batch_id: batch.id(),
            location: batch.location().to_owned(),
        };

        let rows = self
            .warehouse
            .bulk_load(&tables.staging, &[artifact])
            .await
            .map_err(staging_load_failed)?;

        info!(
            batch_id = %batch.id(),
            staging_table = tables.staging,
            rows,
            "loaded batch into staging"
        );

        Ok(StagingLoad::Loaded { rows })
    }
}
