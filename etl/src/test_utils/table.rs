use serde_json::json;

use crate::config::{
    BatchConfig, CircuitBreakerConfig, PipelineConfig, RetryConfig, SourceMode, TableConfig,
};
use crate::source::memory::MemoryChangeSource;
use crate::types::{RowPayload, SourceTableRef};

/// Columns of every table created by [`create_test_table`].
pub const TEST_COLUMNS: [&str; 3] = ["id", "name", "updated_at"];

/// Configuration of `crm.app.public.{name}`, polled on `updated_at` and keyed by `id`.
pub fn test_table_config(name: &str) -> TableConfig {
    TableConfig {
        source_id: "crm".to_string(),
        database: "app".to_string(),
        schema: "public".to_string(),
        name: name.to_string(),
        primary_key: vec!["id".to_string()],
        cursor_column: Some("updated_at".to_string()),
        mode: SourceMode::Polling,
        soft_delete_column: None,
        batch: None,
    }
}

pub fn test_table(name: &str) -> SourceTableRef {
    SourceTableRef {
        source_id: "crm".to_string(),
        database: "app".to_string(),
        schema: "public".to_string(),
        table: name.to_string(),
        primary_key: vec!["id".to_string()],
        cursor_column: Some("updated_at".to_string()),
        mode: SourceMode::Polling,
        soft_delete_column: None,
    }
}

/// Pipeline configuration with millisecond timings so tests run fast.
pub fn test_pipeline_config(tables: Vec<TableConfig>) -> PipelineConfig {
    PipelineConfig {
        id: 1,
        tables,
        batch: BatchConfig {
            max_size: 100,
            max_fill_ms: 10,
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_factor: 2.0,
        },
        circuit_breaker: CircuitBreakerConfig { cooldown_ms: 100 },
        poll_interval_ms: 5,
        idle_wait_ms: 5,
        page_size: 100,
        operation_timeout_ms: 5_000,
        max_ledger_entries: 16,
        flush_on_shutdown: true,
    }
}

/// Registers `table` in `source` with [`TEST_COLUMNS`].
pub async fn create_test_table(source: &MemoryChangeSource, table: &SourceTableRef) {
    source
        .create_table(
            table,
            TEST_COLUMNS.iter().map(|column| column.to_string()).collect(),
        )
        .await;
}

pub fn named(name: &str) -> RowPayload {
    let mut payload = RowPayload::new();
    payload.insert("name".to_string(), json!(name));
    payload
}
