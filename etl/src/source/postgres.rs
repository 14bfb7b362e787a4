use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use postgres::polling::{
    ColumnInfo, CursorKind, DELETED_COLUMN, KeyColumnKind, PAYLOAD_COLUMN, POSITION_COLUMN,
    PollingQuery, SOURCE_TIMESTAMP_COLUMN, fetch_table_columns, key_column_alias,
};
use postgres::schema::TableName;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SourceMode;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::source::{ChangeSource, SourceTableMetadata};
use crate::types::{
    ChangeEvent, ChangeOperation, KeyValue, OrderingToken, PrimaryKey, RowPayload,
    SourceTableId, SourceTableRef,
};
use crate::{bail, etl_error};

/// Attributes connection failures to the source.
fn source_error(err: sqlx::Error) -> EtlError {
    let err = EtlError::from(err);
    match err.kind() {
        ErrorKind::DatabaseUnavailable => {
            err.with_kind(ErrorKind::SourceUnavailable, "Source database is unreachable")
        }
        _ => err,
    }
}

/// Polls Postgres tables by their cursor column.
///
/// Paging uses the composite key `(cursor, primary key...)` with a strict `>` predicate so rows
/// sharing a cursor value are neither dropped nor duplicated at page boundaries. Hard deletes
/// cannot be observed by polling; tables with a soft-delete column emit a delete for rows
/// where it is set.
#[derive(Debug, Clone)]
pub struct PostgresPollingSource {
    pool: PgPool,
    queries: Arc<Mutex<HashMap<SourceTableId, PollingQuery>>>,
}

impl PostgresPollingSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            queries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn polling_query(&self, table: &SourceTableRef) -> EtlResult<PollingQuery> {
        if let Some(query) = self.queries.lock().await.get(&table.id()) {
            return Ok(query.clone());
        }

        self.discover(table).await?;

        let queries = self.queries.lock().await;
        match queries.get(&table.id()) {
            Some(query) => Ok(query.clone()),
            None => Err(etl_error!(
                ErrorKind::InvalidState,
                "Polling query missing after discovery",
                table.id()
            )),
        }
    }

    fn build_polling_query(
        table: &SourceTableRef,
        columns: &[ColumnInfo],
    ) -> EtlResult<PollingQuery> {
        if table.mode == SourceMode::LogBased {
            bail!(
                ErrorKind::ConfigError,
                "Postgres source only supports polling",
                format!("table {} is configured as log based", table.id())
            );
        }

        let find_column = |name: &str| columns.iter().find(|column| column.name == name);

        let mut key_columns = Vec::with_capacity(table.primary_key.len());
        for name in &table.primary_key {
            let Some(column) = find_column(name) else {
                bail!(
                    ErrorKind::SourceSchemaMismatch,
                    "Primary key column is missing in the source table",
                    format!("column `{name}` does not exist in {}", table.id())
                );
            };
            key_columns.push((name.clone(), KeyColumnKind::from_data_type(&column.data_type)));
        }

        let Some(cursor_name) = &table.cursor_column else {
            bail!(
                ErrorKind::ConfigError,
                "Polling tables need a cursor column",
                format!("table {} has no cursor column", table.id())
            );
        };
        let Some(cursor) = find_column(cursor_name) else {
            bail!(
                ErrorKind::SourceSchemaMismatch,
                "Cursor column is missing in the source table",
                format!("column `{cursor_name}` does not exist in {}", table.id())
            );
        };
        let Some(cursor_kind) = CursorKind::from_data_type(&cursor.data_type) else {
            bail!(
                ErrorKind::ConfigError,
                "Cursor column type cannot order changes",
                format!(
                    "column `{cursor_name}` of {} has type `{}`",
                    table.id(),
                    cursor.data_type
                )
            );
        };

        if let Some(soft_delete) = &table.soft_delete_column
            && find_column(soft_delete).is_none()
        {
            bail!(
                ErrorKind::SourceSchemaMismatch,
                "Soft delete column is missing in the source table",
                format!("column `{soft_delete}` does not exist in {}", table.id())
            );
        }

        Ok(PollingQuery {
            table: TableName::new(&table.schema, &table.table),
            cursor_column: cursor_name.clone(),
            cursor_kind,
            key_columns,
            soft_delete_column: table.soft_delete_column.clone(),
        })
    }

    fn decode_row(query: &PollingQuery, row: &PgRow) -> EtlResult<ChangeEvent> {
        let position: i64 = row.try_get(POSITION_COLUMN)?;
        let source_timestamp: DateTime<Utc> = row.try_get(SOURCE_TIMESTAMP_COLUMN)?;

        let mut values = Vec::with_capacity(query.key_columns.len());
        for (index, (_, kind)) in query.key_columns.iter().enumerate() {
            let alias = key_column_alias(index);
            let value = match kind {
                KeyColumnKind::Integer => KeyValue::Int(row.try_get::<i64, _>(alias.as_str())?),
                KeyColumnKind::Text => KeyValue::Text(row.try_get::<String, _>(alias.as_str())?),
            };
            values.push(value);
        }
        let key = PrimaryKey::new(values);

        let payload: String = row.try_get(PAYLOAD_COLUMN)?;
        let payload: RowPayload = serde_json::from_str(&payload)?;
        let deleted: bool = row.try_get(DELETED_COLUMN)?;

        let operation = if deleted {
            ChangeOperation::Delete
        } else {
            ChangeOperation::Upsert
        };

        Ok(ChangeEvent::new(
            operation,
            key,
            payload,
            position,
            source_timestamp,
        ))
    }
}

impl ChangeSource for PostgresPollingSource {
    fn name() -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> EtlResult<()> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map_err(source_error)?;

        Ok(())
    }

    async fn discover(&self, table: &SourceTableRef) -> EtlResult<SourceTableMetadata> {
        let table_name = TableName::new(&table.schema, &table.table);
        let columns = fetch_table_columns(&self.pool, &table_name)
            .await
            .map_err(source_error)?;

        if columns.is_empty() {
            bail!(
                ErrorKind::SourceSchemaMismatch,
                "Source table does not exist",
                format!("no columns found for {table_name}")
            );
        }

        let query = Self::build_polling_query(table, &columns)?;
        info!(table_id = %table.id(), cursor_kind = ?query.cursor_kind, "discovered polling table");
        self.queries.lock().await.insert(table.id(), query);

        Ok(SourceTableMetadata {
            columns: columns.into_iter().map(|column| column.name).collect(),
            primary_key: table.primary_key.clone(),
            cursor_column: table.cursor_column.clone(),
        })
    }

    async fn read_changes(
        &self,
        table: &SourceTableRef,
        since: Option<&OrderingToken>,
        max_events: usize,
    ) -> EtlResult<Vec<ChangeEvent>> {
        let polling_query = self.polling_query(table).await?;
        let sql = polling_query.build(since.is_some());

        let mut query = sqlx::query(&sql);
        if let Some(since) = since {
            query = query.bind(since.position);
            for (value, (_, kind)) in since.key.values().iter().zip(&polling_query.key_columns) {
                query = match (value, kind) {
                    (KeyValue::Int(value), KeyColumnKind::Integer) => query.bind(*value),
                    (KeyValue::Int(value), KeyColumnKind::Text) => query.bind(value.to_string()),
                    (KeyValue::Text(value), _) => query.bind(value.clone()),
                };
            }
        }
        let limit = i64::try_from(max_events).unwrap_or(i64::MAX);
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await.map_err(source_error)?;

        let events = rows
            .iter()
            .map(|row| Self::decode_row(&polling_query, row))
            .collect::<EtlResult<Vec<_>>>()?;

        debug!(table_id = %table.id(), events = events.len(), "polled source table");

        Ok(events)
    }
}
