use chrono::{DateTime, Utc};
use postgres::schema::{MAX_IDENTIFIER_LENGTH, TableName};
use postgres::warehouse::{
    clear_staging_sql, create_schema_sql, create_staging_table_sql, create_target_table_sql,
    insert_staging_rows_sql, merge_deletes_sql, merge_upserts_sql,
};
use sqlx::PgPool;
use tracing::debug;

use crate::artifact::decode_artifact;
use crate::destination::{
    ArtifactLocation, DdlStatement, MergeOutcome, MergeStatement, Warehouse,
};
use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::storage::ObjectStore;

/// Column arrays bound to one staging insert.
#[derive(Debug, Default)]
struct StagingColumns {
    primary_keys: Vec<String>,
    operations: Vec<String>,
    token_positions: Vec<i64>,
    payloads: Vec<String>,
    ingested_at: Vec<DateTime<Utc>>,
    batch_ids: Vec<String>,
}

impl StagingColumns {
    fn len(&self) -> usize {
        self.primary_keys.len()
    }
}

/// Postgres used as the analytical warehouse.
///
/// Target tables store each source row as `jsonb` with `_etl_*` bookkeeping columns. All
/// tables live in one configured schema.
#[derive(Debug, Clone)]
pub struct PostgresWarehouse<O> {
    pool: PgPool,
    schema: String,
    store: O,
}

impl<O> PostgresWarehouse<O> {
    pub fn new(pool: PgPool, schema: impl Into<String>, store: O) -> Self {
        Self {
            pool,
            schema: schema.into(),
            store,
        }
    }

    fn table_name(&self, table: &str) -> TableName {
        TableName::new(&self.schema, table)
    }
}

impl<O> Warehouse for PostgresWarehouse<O>
where
    O: ObjectStore + Sync,
{
    fn name() -> &'static str {
        "postgres"
    }

    async fn execute_ddl(&self, statement: &DdlStatement) -> EtlResult<()> {
        let (DdlStatement::CreateTargetTable { table }
        | DdlStatement::CreateStagingTable { table }) = statement;
        // Truncation would make distinct tables collide.
        if table.len() > MAX_IDENTIFIER_LENGTH {
            bail!(
                ErrorKind::ConfigError,
                "Destination table name is too long for Postgres",
                format!(
                    "`{table}` is {} bytes long, the limit is {MAX_IDENTIFIER_LENGTH}",
                    table.len()
                )
            );
        }

        sqlx::query(&create_schema_sql(&self.schema))
            .execute(&self.pool)
            .await?;

        let sql = match statement {
            DdlStatement::CreateTargetTable { table } => {
                create_target_table_sql(&self.table_name(table))
            }
            DdlStatement::CreateStagingTable { table } => {
                create_staging_table_sql(&self.table_name(table))
            }
        };
        sqlx::query(&sql).execute(&self.pool).await?;

        Ok(())
    }

    async fn bulk_load(
        &self,
        staging_table: &str,
        artifacts: &[ArtifactLocation],
    ) -> EtlResult<u64> {
        let mut columns = StagingColumns::default();
        for artifact in artifacts {
            let bytes = self.store.get(&artifact.location).await?;
            for change in decode_artifact(bytes)? {
                columns.primary_keys.push(change.key.to_json_string());
                columns.operations.push(change.operation.as_str().to_owned());
                columns.token_positions.push(change.token.position);
                columns.payloads.push(serde_json::to_string(&change.payload)?);
                columns.ingested_at.push(change.ingested_at);
                columns.batch_ids.push(artifact.batch_id.to_string());
            }
        }

        if columns.len() == 0 {
            return Ok(0);
        }

        let staging = self.table_name(staging_table);
        let result = sqlx::query(&insert_staging_rows_sql(&staging))
            .bind(&columns.primary_keys)
            .bind(&columns.operations)
            .bind(&columns.token_positions)
            .bind(&columns.payloads)
            .bind(&columns.ingested_at)
            .bind(&columns.batch_ids)
            .execute(&self.pool)
            .await?;

        debug!(staging_table = %staging, rows = result.rows_affected(), "inserted staging rows");

        Ok(result.rows_affected())
    }

    async fn execute_merge(&self, statement: &MergeStatement) -> EtlResult<MergeOutcome> {
        let target = self.table_name(&statement.target);
        let staging = self.table_name(&statement.staging);

        let mut transaction = self.pool.begin().await?;

        let upserted = sqlx::query(&merge_upserts_sql(&target, &staging))
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        let deleted = sqlx::query(&merge_deletes_sql(&target, &staging))
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        let staged_rows = sqlx::query(&clear_staging_sql(&staging))
            .execute(&mut *transaction)
            .await?
            .rows_affected();

        transaction.commit().await?;

        Ok(MergeOutcome {
            staged_rows,
            upserted,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::storage::memory::MemoryObjectStore;

    #[tokio::test]
    async fn rejects_names_postgres_would_truncate() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://etl@localhost/etl")
            .unwrap();
        let warehouse = PostgresWarehouse::new(pool, "analytics", MemoryObjectStore::new());

        let err = warehouse
            .execute_ddl(&DdlStatement::CreateStagingTable {
                table: "t".repeat(MAX_IDENTIFIER_LENGTH + 1),
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
