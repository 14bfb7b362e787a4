use std::collections::HashSet;

use serde::Deserialize;

use crate::shared::{BatchConfig, CircuitBreakerConfig, RetryConfig, TableConfig, ValidationError};

/// Settings shared by every table pipeline run by one orchestrator.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Identifier isolating this pipeline's checkpoints from other pipelines.
    pub id: u64,
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Wait between polls once a polling table is drained.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait between reads once a log-based table is drained.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Maximum number of events requested from the source per read.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Deadline applied to each call into the source, object store, warehouse or checkpoint store.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Upper bound on staged-but-unmerged batches remembered per table.
    #[serde(default = "default_max_ledger_entries")]
    pub max_ledger_entries: usize,
    /// Whether buffered events are flushed and merged on shutdown instead of being re-read later.
    #[serde(default = "default_flush_on_shutdown")]
    pub flush_on_shutdown: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;
        self.retry.validate()?;

        if self.tables.is_empty() {
            return Err(ValidationError::NoTables);
        }

        let mut seen = HashSet::new();
        let mut destinations = HashSet::new();
        for table in &self.tables {
            let name = table.qualified_name();
            if !seen.insert(name.clone()) {
                return Err(ValidationError::DuplicateTable(name));
            }

            let destination = table.destination_name();
            if !destinations.insert(destination.clone()) {
                return Err(ValidationError::DuplicateDestination(destination));
            }
        }

        if self.page_size == 0 {
            return Err(ValidationError::invalid_field(
                "page_size",
                "must be greater than 0",
            ));
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::invalid_field(
                "operation_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.max_ledger_entries == 0 {
            return Err(ValidationError::invalid_field(
                "max_ledger_entries",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_idle_wait_ms() -> u64 {
    250
}

fn default_page_size() -> usize {
    1_000
}

fn default_operation_timeout_ms() -> u64 {
    60_000
}

fn default_max_ledger_entries() -> usize {
    64
}

fn default_flush_on_shutdown() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tables: &str) -> PipelineConfig {
        serde_json::from_str(&format!(r#"{{"id": 1, "tables": {tables}}}"#)).unwrap()
    }

    #[test]
    fn applies_defaults() {
        let config = config(
            r#"[{"source_id":"crm","database":"app","schema":"public","name":"a","primary_key":["id"]}]"#,
        );

        assert_eq!(config.page_size, 1_000);
        assert_eq!(config.batch, BatchConfig::default());
        assert!(config.flush_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_tables() {
        let table = r#"{"source_id":"crm","database":"app","schema":"public","name":"a","primary_key":["id"]}"#;
        let config = config(&format!("[{table}, {table}]"));

        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::DuplicateTable("crm.app.public.a".to_string())
        );
    }

    #[test]
    fn tables_differing_only_in_part_boundaries_are_accepted() {
        let config = config(
            r#"[
                {"source_id":"crm","database":"app","schema":"public","name":"user_events","primary_key":["id"]},
                {"source_id":"crm","database":"app","schema":"public_user","name":"events","primary_key":["id"]}
            ]"#,
        );

        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_table_list() {
        assert_eq!(config("[]").validate().unwrap_err(), ValidationError::NoTables);
    }
}
