use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::concurrency::lease::TableLeases;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::config::{PipelineConfig, PipelineId, SyncPipelineConfig};
use crate::destination::Warehouse;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::source::ChangeSource;
use crate::state::phase::{SyncPhase, SyncStatus};
use crate::storage::ObjectStore;
use crate::store::checkpoint::CheckpointStore;
use crate::types::SourceTableId;
use crate::workers::pool::SyncPipelinePool;
use crate::workers::sync::SyncPipeline;

#[derive(Debug)]
enum OrchestratorState {
    NotStarted,
    Started { pool: SyncPipelinePool },
}

/// Table whose configuration was rejected at start.
#[derive(Debug)]
struct RejectedTable {
    table_id: SourceTableId,
    error: EtlError,
}

/// Runs one [`SyncPipeline`] per configured table.
///
/// Pipelines are independent: a table that fails, or whose configuration is invalid, never
/// stops the others. All of them share one shutdown signal and one registry of merge leases.
#[derive(Debug)]
pub struct Orchestrator<S, O, C, W> {
    config: Arc<PipelineConfig>,
    source: S,
    object_store: O,
    checkpoint_store: C,
    warehouse: W,
    leases: TableLeases,
    state: OrchestratorState,
    rejected: Vec<RejectedTable>,
    shutdown_tx: ShutdownTx,
}

impl<S, O, C, W> Orchestrator<S, O, C, W>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    O: ObjectStore + Clone + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
    W: Warehouse + Clone + Send + Sync + 'static,
{
    pub fn new(
        config: PipelineConfig,
        source: S,
        object_store: O,
        checkpoint_store: C,
        warehouse: W,
    ) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            object_store,
            checkpoint_store,
            warehouse,
            leases: TableLeases::new(),
            state: OrchestratorState::NotStarted,
            rejected: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.config.id
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Spawns a sync pipeline for every valid table.
    ///
    /// Fails only when the pipeline-wide configuration is invalid. Invalid tables are logged,
    /// reported as failed by [`Orchestrator::statuses`] and returned as errors by
    /// [`Orchestrator::wait`].
    pub async fn start(&mut self) -> EtlResult<()> {
        if let OrchestratorState::Started { .. } = self.state {
            warn!(pipeline_id = self.config.id, "orchestrator already started");
            return Ok(());
        }

        self.config.validate().map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid pipeline configuration",
                err.to_string(),
                source: err
            )
        })?;

        info!(
            pipeline_id = self.config.id,
            tables = self.config.tables.len(),
            "starting orchestrator"
        );

        let pool = SyncPipelinePool::new();

        for table in &self.config.tables {
            let sync_config = match SyncPipelineConfig::from_config(&self.config, table) {
                Ok(sync_config) => sync_config,
                Err(err) => {
                    let table_id = SourceTableId::for_config(table);
                    error!(%table_id, error = %err, "rejected table configuration");

                    self.rejected.push(RejectedTable {
                        table_id,
                        error: err,
                    });
                    continue;
                }
            };

            SyncPipeline::new(
                Arc::new(sync_config),
                self.source.clone(),
                self.object_store.clone(),
                self.checkpoint_store.clone(),
                self.warehouse.clone(),
                self.leases.clone(),
                self.shutdown_tx.subscribe(),
            )
            .spawn_into_pool(&pool)
            .await;
        }

        self.state = OrchestratorState::Started { pool };

        Ok(())
    }

    /// Snapshot of the status of every table, including rejected ones.
    pub async fn statuses(&self) -> BTreeMap<SourceTableId, SyncStatus> {
        let mut statuses = match &self.state {
            OrchestratorState::Started { pool } => pool.statuses().await,
            OrchestratorState::NotStarted => BTreeMap::new(),
        };

        for rejected in &self.rejected {
            statuses.insert(
                rejected.table_id.clone(),
                SyncStatus {
                    phase: SyncPhase::Failed,
                    last_error: Some(rejected.error.to_string()),
                    ..SyncStatus::default()
                },
            );
        }

        statuses
    }

    /// Waits for every pipeline to stop, aggregating the errors of failed tables.
    pub async fn wait(self) -> EtlResult<()> {
        let mut errors: Vec<EtlError> = self
            .rejected
            .into_iter()
            .map(|rejected| rejected.error)
            .collect();

        let OrchestratorState::Started { pool } = self.state else {
            info!("orchestrator was not started, nothing to wait for");
            return if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.into())
            };
        };

        info!("waiting for sync pipelines to complete");

        if let Err(err) = pool.wait_all().await {
            info!(failed = err.kinds().len(), "sync pipelines failed with an error");
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    /// Asks every pipeline to stop at its next safe boundary.
    pub fn shutdown(&self) {
        info!("trying to shut down the orchestrator");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the sync pipelines: {}", err);
            return;
        }

        info!("shut down signal successfully sent to all sync pipelines");
    }

    pub async fn shutdown_and_wait(self) -> EtlResult<()> {
        self.shutdown();
        self.wait().await
    }
}
