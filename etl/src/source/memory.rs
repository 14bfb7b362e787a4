use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::config::SourceMode;
use crate::error::{ErrorKind, EtlResult};
use crate::source::{ChangeSource, SourceTableMetadata};
use crate::types::{ChangeEvent, OrderingToken, SourceTableId, SourceTableRef};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    /// Kept sorted by token.
    changes: Vec<ChangeEvent>,
}

/// In-memory change log, one ordered list of changes per table.
///
/// Serves both polling and log-based tables since reads are keyed by token only. Mostly
/// useful for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeSource {
    inner: Arc<Mutex<HashMap<SourceTableId, MemoryTable>>>,
}

impl MemoryChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `table` with the given columns, keeping existing changes.
    pub async fn create_table(&self, table: &SourceTableRef, columns: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.entry(table.id()).or_default().columns = columns;
    }

    /// Removes a column, making later discoveries of tables relying on it fail.
    pub async fn drop_column(&self, table: &SourceTableRef, column: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(memory_table) = inner.get_mut(&table.id()) {
            memory_table.columns.retain(|existing| existing != column);
        }
    }

    /// Appends changes to the log of `table`.
    ///
    /// A change whose token is already present replaces the stored one.
    pub async fn push_changes(&self, table: &SourceTableRef, changes: Vec<ChangeEvent>) {
        let mut inner = self.inner.lock().await;
        let memory_table = inner.entry(table.id()).or_default();

        for change in changes {
            match memory_table
                .changes
                .binary_search_by(|existing| existing.token.cmp(&change.token))
            {
                Ok(index) => memory_table.changes[index] = change,
                Err(index) => memory_table.changes.insert(index, change),
            }
        }
    }

    pub async fn change_count(&self, table: &SourceTableRef) -> usize {
        let inner = self.inner.lock().await;
        inner
            .get(&table.id())
            .map(|memory_table| memory_table.changes.len())
            .unwrap_or_default()
    }
}

impl ChangeSource for MemoryChangeSource {
    fn name() -> &'static str {
        "memory"
    }

    async fn connect(&self) -> EtlResult<()> {
        Ok(())
    }

    async fn discover(&self, table: &SourceTableRef) -> EtlResult<SourceTableMetadata> {
        let inner = self.inner.lock().await;
        let Some(memory_table) = inner.get(&table.id()) else {
            bail!(
                ErrorKind::SourceSchemaMismatch,
                "Source table does not exist",
                format!("table {} is unknown to the memory source", table.id())
            );
        };

        for column in &table.primary_key {
            if !memory_table.columns.contains(column) {
                bail!(
                    ErrorKind::SourceSchemaMismatch,
                    "Primary key column is missing in the source table",
                    format!("column `{column}` does not exist in {}", table.id())
                );
            }
        }

        if table.mode == SourceMode::Polling
            && let Some(cursor) = &table.cursor_column
            && !memory_table.columns.contains(cursor)
        {
            bail!(
                ErrorKind::SourceSchemaMismatch,
                "Cursor column is missing in the source table",
                format!("column `{cursor}` does not exist in {}", table.id())
            );
        }

        Ok(SourceTableMetadata {
            columns: memory_table.columns.clone(),
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
        let inner = self.inner.lock().await;
        let Some(memory_table) = inner.get(&table.id()) else {
            return Ok(Vec::new());
        };

        let start = match since {
            Some(since) => memory_table
                .changes
                .partition_point(|change| &change.token <= since),
            None => 0,
        };

        let page: Vec<ChangeEvent> = memory_table.changes[start..]
            .iter()
            .take(max_events)
            .cloned()
            .collect();

        debug!(table_id = %table.id(), events = page.len(), "read changes from memory source");

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimaryKey, RowPayload};
    use serde_json::json;

    fn table() -> SourceTableRef {
        SourceTableRef {
            source_id: "crm".to_string(),
            database: "app".to_string(),
            schema: "public".to_string(),
            table: "users".to_string(),
            primary_key: vec!["id".to_string()],
            cursor_column: Some("updated_at".to_string()),
            mode: SourceMode::Polling,
            soft_delete_column: None,
        }
    }

    fn payload(id: i64) -> RowPayload {
        json!({"id": id, "updated_at": "2025-01-01T00:00:00Z"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn pages_resume_after_shared_position() {
        let source = MemoryChangeSource::new();
        let table = table();
        source
            .create_table(&table, vec!["id".to_string(), "updated_at".to_string()])
            .await;
        // Five rows share the same cursor position.
        source
            .push_changes(
                &table,
                (1..=5).map(|id| ChangeEvent::upsert(id, payload(id), 100)).collect(),
            )
            .await;

        let first = source.read_changes(&table, None, 3).await.unwrap();
        let second = source
            .read_changes(&table, Some(&first[2].token), 3)
            .await
            .unwrap();

        let keys: Vec<PrimaryKey> = first
            .iter()
            .chain(second.iter())
            .map(|event| event.key.clone())
            .collect();
        assert_eq!(
            keys,
            (1..=5_i64).map(PrimaryKey::from).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn discovery_detects_missing_columns() {
        let source = MemoryChangeSource::new();
        let table = table();
        source
            .create_table(&table, vec!["id".to_string(), "updated_at".to_string()])
            .await;
        assert!(source.discover(&table).await.is_ok());

        source.drop_column(&table, "id").await;
        let err = source.discover(&table).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceSchemaMismatch);
    }
}
