use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::EtlResult;
use crate::types::{BatchId, OrderingToken, PrimaryKey, RowPayload, SourceTableRef};

/// Prefix of staging table names.
pub const STAGING_TABLE_PREFIX: &str = "_etl_staging_";

/// Names of the warehouse tables a source table is replicated into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationTables {
    pub target: String,
    pub staging: String,
}

impl DestinationTables {
    pub fn for_table(table: &SourceTableRef) -> Self {
        let target = table.destination_name();
        Self {
            staging: format!("{STAGING_TABLE_PREFIX}{target}"),
            target,
        }
    }
}

/// Schema changes the pipeline asks a warehouse for. Both are idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlStatement {
    CreateTargetTable { table: String },
    CreateStagingTable { table: String },
}

/// A batch artifact to bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub batch_id: BatchId,
    pub location: String,
}

/// Reconciliation of everything in `staging` into `target`.
///
/// Per primary key the newest staged upsert replaces the row unless the row holds an equal
/// or newer token. Then the newest staged delete marks the row deleted when its token is
/// newer, or equal on a row that is not deleted yet. Staging is cleared in the same
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    pub target: String,
    pub staging: String,
}

impl From<&DestinationTables> for MergeStatement {
    fn from(tables: &DestinationTables) -> Self {
        Self {
            target: tables.target.clone(),
            staging: tables.staging.clone(),
        }
    }
}

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows that were in staging.
    pub staged_rows: u64,
    /// Target rows inserted or replaced by an upsert.
    pub upserted: u64,
    /// Target rows newly marked deleted.
    pub deleted: u64,
}

/// A row of a target table.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub key: PrimaryKey,
    /// Last upserted payload, kept when the row is marked deleted.
    pub payload: RowPayload,
    /// Token of the last change applied to the row.
    pub token: OrderingToken,
    pub deleted: bool,
    pub ingested_at: DateTime<Utc>,
    pub merged_at: DateTime<Utc>,
}

/// Analytical warehouse receiving merged data.
///
/// Every operation is atomic on the warehouse side.
pub trait Warehouse {
    /// Returns the name of the warehouse kind.
    fn name() -> &'static str;

    fn execute_ddl(&self, statement: &DdlStatement) -> impl Future<Output = EtlResult<()>> + Send;

    /// Appends the rows of the given artifacts to `staging_table`, returning the number of
    /// rows staged.
    fn bulk_load(
        &self,
        staging_table: &str,
        artifacts: &[ArtifactLocation],
    ) -> impl Future<Output = EtlResult<u64>> + Send;

    fn execute_merge(
        &self,
        statement: &MergeStatement,
    ) -> impl Future<Output = EtlResult<MergeOutcome>> + Send;
}
