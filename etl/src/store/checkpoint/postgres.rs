use postgres::checkpoints::{
    get_checkpoint_row, list_checkpoint_table_ids, lock_checkpoint_row, upsert_checkpoint_row,
};
use sqlx::PgPool;
use tracing::debug;

use crate::config::PipelineId;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::state::checkpoint::{Checkpoint, validate_checkpoint_update};
use crate::store::checkpoint::CheckpointStore;
use crate::types::SourceTableId;

fn load_failed(err: sqlx::Error) -> EtlError {
    EtlError::from(err).with_kind(ErrorKind::CheckpointLoadFailed, "Checkpoint could not be read")
}

fn save_failed(err: sqlx::Error) -> EtlError {
    EtlError::from(err)
        .with_kind(ErrorKind::CheckpointSaveFailed, "Checkpoint could not be written")
}

/// Checkpoint store persisting to the `etl.checkpoints` table.
///
/// A save locks the table's row, validates the update against the stored checkpoint and
/// upserts it within one transaction.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pipeline_id: PipelineId,
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pipeline_id: PipelineId, pool: PgPool) -> Self {
        Self { pipeline_id, pool }
    }

    fn pipeline_id(&self) -> i64 {
        self.pipeline_id as i64
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn name() -> &'static str {
        "postgres"
    }

    async fn get_checkpoint(&self, table_id: &SourceTableId) -> EtlResult<Option<Checkpoint>> {
        let row = get_checkpoint_row(&self.pool, self.pipeline_id(), table_id.as_str())
            .await
            .map_err(load_failed)?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.checkpoint)?)),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(
        &self,
        table_id: &SourceTableId,
        checkpoint: &Checkpoint,
    ) -> EtlResult<()> {
        let mut transaction = self.pool.begin().await.map_err(save_failed)?;

        let current = lock_checkpoint_row(&mut transaction, self.pipeline_id(), table_id.as_str())
            .await
            .map_err(save_failed)?
            .map(serde_json::from_value::<Checkpoint>)
            .transpose()?;
        validate_checkpoint_update(current.as_ref(), checkpoint)?;

        upsert_checkpoint_row(
            &mut transaction,
            self.pipeline_id(),
            table_id.as_str(),
            serde_json::to_value(checkpoint)?,
        )
        .await
        .map_err(save_failed)?;

        transaction.commit().await.map_err(save_failed)?;

        debug!(%table_id, "saved checkpoint");

        Ok(())
    }

    async fn list_tracked_tables(&self) -> EtlResult<Vec<SourceTableId>> {
        let table_ids = list_checkpoint_table_ids(&self.pool, self.pipeline_id())
            .await
            .map_err(load_failed)?;

        Ok(table_ids.into_iter().map(SourceTableId::new).collect())
    }
}
