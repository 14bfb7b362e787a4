use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::artifact::decode_artifact;
use crate::destination::{
    ArtifactLocation, DdlStatement, MergeOutcome, MergeStatement, TargetRow, Warehouse,
};
use crate::error::{ErrorKind, EtlResult};
use crate::materialize::merge::merge_changes;
use crate::storage::ObjectStore;
use crate::types::{BatchId, ChangeEvent, PrimaryKey};
use crate::{bail, etl_error};

/// A row of a staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub batch_id: BatchId,
    pub change: ChangeEvent,
}

#[derive(Debug, Default)]
struct Inner {
    targets: HashMap<String, BTreeMap<PrimaryKey, TargetRow>>,
    staging: HashMap<String, Vec<StagedRow>>,
    merges: u64,
}

/// Warehouse holding target and staging tables in memory.
///
/// Artifacts are read from the object store they were written to. A merge runs under a
/// single lock, which makes it atomic.
#[derive(Debug, Clone)]
pub struct MemoryWarehouse<O> {
    store: O,
    inner: Arc<Mutex<Inner>>,
}

impl<O> MemoryWarehouse<O> {
    pub fn new(store: O) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the rows of `table` ordered by primary key, including deleted ones.
    pub async fn target_rows(&self, table: &str) -> Vec<TargetRow> {
        let inner = self.inner.lock().await;
        inner
            .targets
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn target_row(&self, table: &str, key: &PrimaryKey) -> Option<TargetRow> {
        let inner = self.inner.lock().await;
        inner.targets.get(table)?.get(key).cloned()
    }

    pub async fn staged_rows(&self, table: &str) -> Vec<StagedRow> {
        let inner = self.inner.lock().await;
        inner.staging.get(table).cloned().unwrap_or_default()
    }

    pub async fn merge_count(&self) -> u64 {
        self.inner.lock().await.merges
    }
}

impl<O> Warehouse for MemoryWarehouse<O>
where
    O: ObjectStore + Sync,
{
    fn name() -> &'static str {
        "memory"
    }

    async fn execute_ddl(&self, statement: &DdlStatement) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        match statement {
            DdlStatement::CreateTargetTable { table } => {
                inner.targets.entry(table.clone()).or_default();
            }
            DdlStatement::CreateStagingTable { table } => {
                inner.staging.entry(table.clone()).or_default();
            }
        }

        Ok(())
    }

    async fn bulk_load(
        &self,
        staging_table: &str,
        artifacts: &[ArtifactLocation],
    ) -> EtlResult<u64> {
        // Reads happen before taking the lock so a failed read stages nothing.
        let mut rows = Vec::new();
        for artifact in artifacts {
            let bytes = self.store.get(&artifact.location).await?;
            rows.extend(
                decode_artifact(bytes)?
                    .into_iter()
                    .map(|change| StagedRow {
                        batch_id: artifact.batch_id,
                        change,
                    }),
            );
        }

        let mut inner = self.inner.lock().await;
        let Some(staging) = inner.staging.get_mut(staging_table) else {
            bail!(
                ErrorKind::InvalidState,
                "Staging table does not exist",
                format!("staging table `{staging_table}` was never created")
            );
        };

        let count = rows.len() as u64;
        staging.extend(rows);
        debug!(staging_table, rows = count, "appended rows to staging");

        Ok(count)
    }

    async fn execute_merge(&self, statement: &MergeStatement) -> EtlResult<MergeOutcome> {
        let mut inner = self.inner.lock().await;

        if !inner.targets.contains_key(&statement.target) {
            bail!(
                ErrorKind::InvalidState,
                "Target table does not exist",
                format!("target table `{}` was never created", statement.target)
            );
        }

        let staged = inner
            .staging
            .get_mut(&statement.staging)
            .map(std::mem::take)
            .ok_or_else(|| {
                etl_error!(
                    ErrorKind::InvalidState,
                    "Staging table does not exist",
                    format!("staging table `{}` was never created", statement.staging)
                )
            })?;

        let target = inner
            .targets
            .get_mut(&statement.target)
            .ok_or_else(|| etl_error!(ErrorKind::InvalidState, "Target table does not exist"))?;
        let outcome = merge_changes(target, staged.into_iter().map(|row| row.change).collect());
        inner.merges += 1;

        Ok(outcome)
    }
}
