//! Configuration objects for ETL.
//!
//! Serialized settings are re-exported from the `config` crate. [`SyncPipelineConfig`] is the
//! resolved, per-table view a [`crate::workers::sync::SyncPipeline`] runs with.

use std::time::Duration;

use crate::error::{EtlError, EtlResult};
use crate::types::SourceTableRef;

// Re-exports.
pub use config::shared::*;

/// Identifier of a pipeline, used to namespace checkpoints.
pub type PipelineId = u64;

/// Resolved flush policy of a table's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub max_size: usize,
    pub max_fill: Duration,
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_size: config.max_size,
            max_fill: Duration::from_millis(config.max_fill_ms),
        }
    }
}

/// Resolved backoff settings of a table's pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f32,
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }
}

/// Everything a single table's sync pipeline needs to run.
#[derive(Debug, Clone)]
pub struct SyncPipelineConfig {
    pub pipeline_id: PipelineId,
    pub table: SourceTableRef,
    pub batch: BatchSettings,
    pub retry: RetrySettings,
    pub circuit_cooldown: Duration,
    pub poll_interval: Duration,
    pub idle_wait: Duration,
    pub page_size: usize,
    pub operation_timeout: Duration,
    pub max_ledger_entries: usize,
    pub flush_on_shutdown: bool,
}

impl SyncPipelineConfig {
    /// Resolves the settings of `table`, applying its batch override if any.
    ///
    /// Fails with [`crate::error::ErrorKind::ConfigError`] when the table's own settings are
    /// invalid.
    pub fn from_config(pipeline: &PipelineConfig, table: &TableConfig) -> EtlResult<Self> {
        let table_ref = SourceTableRef::try_from(table)?;
        let batch = table.batch.as_ref().unwrap_or(&pipeline.batch);

        Ok(Self {
            pipeline_id: pipeline.id,
            table: table_ref,
            batch: BatchSettings::from(batch),
            retry: RetrySettings::from(&pipeline.retry),
            circuit_cooldown: Duration::from_millis(pipeline.circuit_breaker.cooldown_ms),
            poll_interval: Duration::from_millis(pipeline.poll_interval_ms),
            idle_wait: Duration::from_millis(pipeline.idle_wait_ms),
            page_size: pipeline.page_size,
            operation_timeout: Duration::from_millis(pipeline.operation_timeout_ms),
            max_ledger_entries: pipeline.max_ledger_entries,
            flush_on_shutdown: pipeline.flush_on_shutdown,
        })
    }

    /// Wait applied between reads once the source reports no new changes.
    pub fn drained_wait(&self) -> Duration {
        match self.table.mode {
            SourceMode::Polling => self.poll_interval,
            SourceMode::LogBased => self.idle_wait,
        }
    }
}

impl TryFrom<(&PipelineConfig, &TableConfig)> for SyncPipelineConfig {
    type Error = EtlError;

    fn try_from((pipeline, table): (&PipelineConfig, &TableConfig)) -> EtlResult<Self> {
        Self::from_config(pipeline, table)
    }
}
