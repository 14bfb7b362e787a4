use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::batch::buffer::BatchBuffer;
use crate::batch::writer::BatchWriter;
use crate::concurrency::lease::TableLeases;
use crate::concurrency::shutdown::{
    ShutdownResult, ShutdownRx, shutdown_pending, sleep_or_shutdown,
};
use crate::concurrency::timeout::with_timeout;
use crate::config::SyncPipelineConfig;
use crate::destination::{DdlStatement, DestinationTables, Warehouse};
use crate::error::{EtlError, EtlResult};
use crate::failpoints::{
    SYNC_PIPELINE__AFTER_MERGE, SYNC_PIPELINE__AFTER_STAGING, SYNC_PIPELINE__AFTER_WRITE,
    etl_fail_point,
};
use crate::materialize::merge::MergeMaterializer;
use crate::materialize::staging::{StagingLoad, StagingLoader};
use crate::source::ChangeSource;
use crate::state::checkpoint::Checkpoint;
use crate::state::phase::{SyncPhase, SyncStatus};
use crate::state::retry::{FailureOutcome, RetryState};
use crate::storage::ObjectStore;
use crate::store::checkpoint::CheckpointStore;
use crate::types::{Batch, BatchStatus, SourceTableId};
use crate::workers::policy::build_error_policy;
use crate::workers::pool::SyncPipelinePool;

/// Result of running one batch through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    /// The batch was merged and its checkpoint saved.
    Committed,
    /// The buffer held no events.
    Empty,
    /// Shutdown interrupted a retry wait. The checkpoint was left untouched.
    Interrupted,
}

/// Replicates one source table: read, buffer, flush, load, merge, checkpoint, repeat.
///
/// Every stage that calls an external system is retried with exponential backoff while its
/// errors are retryable. Once the configured number of consecutive failures is reached the
/// circuit opens for the cooldown, then the failed stage is tried again. Fatal errors stop the
/// pipeline.
///
/// Shutdown is cooperative. Before loading starts, the buffered events are flushed and
/// committed (or dropped when `flush_on_shutdown` is off). A batch that started loading is
/// always carried through its checkpoint, unless shutdown arrives while waiting to retry.
#[derive(Debug)]
pub struct SyncPipeline<S, O, C, W> {
    config: Arc<SyncPipelineConfig>,
    source: S,
    writer: BatchWriter<O>,
    checkpoint_store: C,
    warehouse: W,
    loader: StagingLoader<W>,
    materializer: MergeMaterializer<W>,
    shutdown_rx: ShutdownRx,
    shutting_down: bool,
    retry: RetryState,
    phase: SyncPhase,
    checkpoint: Checkpoint,
    status_tx: watch::Sender<SyncStatus>,
}

impl<S, O, C, W> SyncPipeline<S, O, C, W>
where
    O: ObjectStore,
    W: Warehouse + Clone,
{
    pub fn new(
        config: Arc<SyncPipelineConfig>,
        source: S,
        object_store: O,
        checkpoint_store: C,
        warehouse: W,
        leases: TableLeases,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let retry = RetryState::new(config.retry, config.circuit_cooldown);
        let (status_tx, _) = watch::channel(SyncStatus::default());

        Self {
            config,
            source,
            writer: BatchWriter::new(object_store),
            checkpoint_store,
            loader: StagingLoader::new(warehouse.clone()),
            materializer: MergeMaterializer::new(warehouse.clone(), leases),
            warehouse,
            shutdown_rx,
            shutting_down: false,
            retry,
            phase: SyncPhase::Idle,
            checkpoint: Checkpoint::default(),
            status_tx,
        }
    }

    pub fn table_id(&self) -> SourceTableId {
        self.config.table.id()
    }

    /// Receiver of the status published at every phase change.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }
}

impl<S, O, C, W> SyncPipeline<S, O, C, W>
where
    S: ChangeSource + Send + Sync + 'static,
    O: ObjectStore + Send + Sync + 'static,
    C: CheckpointStore + Send + Sync + 'static,
    W: Warehouse + Clone + Send + Sync + 'static,
{
    /// Spawns the pipeline into `pool`, instrumented with its own span.
    pub async fn spawn_into_pool(self, pool: &SyncPipelinePool) {
        let table_id = self.table_id();
        let status_rx = self.subscribe_status();

        let span = tracing::info_span!(
            "sync_pipeline",
            pipeline_id = self.config.pipeline_id,
            table_id = %table_id,
        );

        pool.spawn(table_id, status_rx, self.run().instrument(span))
            .await;
    }

    /// Runs the pipeline until shutdown or a fatal error.
    pub async fn run(mut self) -> EtlResult<()> {
        info!("starting sync pipeline");

        let result = self.run_sync_loop().await;
        match &result {
            Ok(()) => {
                self.set_phase(SyncPhase::Stopped);
                info!("sync pipeline stopped");
            }
            Err(err) => {
                let message = err.to_string();
                self.status_tx
                    .send_modify(|status| status.last_error = Some(message));
                self.set_phase(SyncPhase::Failed);
                error!(error = %err, "sync pipeline failed");
            }
        }

        result
    }

    async fn run_sync_loop(&mut self) -> EtlResult<()> {
        self.set_phase(SyncPhase::Reading);
        let checkpoint = loop {
            match self.prepare().await {
                Ok(checkpoint) => break checkpoint,
                Err(err) => {
                    if self
                        .handle_stage_failure(SyncPhase::Reading, err)
                        .await?
                        .should_shutdown()
                    {
                        return Ok(());
                    }
                }
            }
        };
        self.succeeded();
        self.adopt_checkpoint(checkpoint.unwrap_or_default());

        let mut buffer = BatchBuffer::new(self.config.table.clone(), self.config.batch);

        loop {
            if self.shutdown_requested() {
                return self.finish_on_shutdown(&mut buffer).await;
            }

            if buffer.should_flush(Instant::now()) {
                if self.process_batch(&mut buffer).await? == BatchOutcome::Interrupted {
                    return Ok(());
                }
                continue;
            }

            self.set_phase(SyncPhase::Reading);
            let since = buffer
                .last_token()
                .or(self.checkpoint.high_watermark.as_ref())
                .cloned();
            let max_events = buffer
                .remaining_capacity()
                .min(self.config.page_size)
                .max(1);

            let page = loop {
                let result = with_timeout(
                    self.config.operation_timeout,
                    "source read",
                    self.source
                        .read_changes(&self.config.table, since.as_ref(), max_events),
                )
                .await;

                match result {
                    Ok(page) => break page,
                    Err(err) => {
                        if self
                            .handle_stage_failure(SyncPhase::Reading, err)
                            .await?
                            .should_shutdown()
                        {
                            return self.finish_on_shutdown(&mut buffer).await;
                        }
                    }
                }
            };
            self.succeeded();

            let drained = page.len() < max_events;
            if !page.is_empty() {
                self.set_phase(SyncPhase::Buffering);
                debug!(events = page.len(), "buffering change events");

                for event in page {
                    buffer.push(event)?;
                }
            }

            if buffer.should_flush(Instant::now()) || !drained {
                continue;
            }

            // Drained: wait for new changes, or for the fill window of what is buffered.
            let now = Instant::now();
            let mut wait = self.config.drained_wait();
            if let Some(deadline) = buffer.flush_deadline() {
                wait = wait.min(deadline.saturating_duration_since(now));
            }

            self.set_phase(SyncPhase::Idle);
            if sleep_or_shutdown(wait, &mut self.shutdown_rx)
                .await
                .should_shutdown()
            {
                self.shutting_down = true;
            }
        }
    }

    /// Connects to the source, checks the table and its destination tables exist, and loads
    /// the stored checkpoint.
    async fn prepare(&self) -> EtlResult<Option<Checkpoint>> {
        let timeout = self.config.operation_timeout;
        let table = &self.config.table;

        with_timeout(timeout, "source connect", self.source.connect()).await?;
        let metadata =
            with_timeout(timeout, "source discovery", self.source.discover(table)).await?;
        debug!(
            columns = metadata.columns.len(),
            primary_key = ?metadata.primary_key,
            "discovered source table"
        );

        let tables = DestinationTables::for_table(table);
        with_timeout(
            timeout,
            "target table ddl",
            self.warehouse.execute_ddl(&DdlStatement::CreateTargetTable {
                table: tables.target,
            }),
        )
        .await?;
        with_timeout(
            timeout,
            "staging table ddl",
            self.warehouse.execute_ddl(&DdlStatement::CreateStagingTable {
                table: tables.staging,
            }),
        )
        .await?;

        with_timeout(
            timeout,
            "checkpoint load",
            self.checkpoint_store.get_checkpoint(&table.id()),
        )
        .await
    }

    /// Drains the buffer on shutdown, or drops it when flushing on shutdown is disabled.
    async fn finish_on_shutdown(&mut self, buffer: &mut BatchBuffer) -> EtlResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        if !self.config.flush_on_shutdown {
            info!(
                events = buffer.len(),
                "dropping buffered events on shutdown, they will be read again"
            );
            buffer.clear();
            return Ok(());
        }

        info!(events = buffer.len(), "flushing buffered events before shutdown");
        self.process_batch(buffer).await?;

        Ok(())
    }

    /// Carries the buffered events from the flush through the checkpoint save.
    async fn process_batch(&mut self, buffer: &mut BatchBuffer) -> EtlResult<BatchOutcome> {
        if buffer.is_empty() {
            return Ok(BatchOutcome::Empty);
        }

        let timeout = self.config.operation_timeout;

        self.set_phase(SyncPhase::Flushing);
        let mut batch = loop {
            let result = with_timeout(timeout, "artifact write", buffer.flush(&self.writer)).await;

            match result {
                Ok(Some(batch)) => break batch,
                Ok(None) => return Ok(BatchOutcome::Empty),
                Err(err) => {
                    if self
                        .handle_stage_failure(SyncPhase::Flushing, err)
                        .await?
                        .should_shutdown()
                    {
                        return Ok(BatchOutcome::Interrupted);
                    }
                }
            }
        };
        self.succeeded();
        info!(
            batch_id = %batch.id(),
            events = batch.event_count(),
            location = batch.location(),
            "batch written"
        );

        if self.load_batch(&batch).await?.should_shutdown() {
            return Ok(BatchOutcome::Interrupted);
        }
        batch.advance(BatchStatus::Staged)?;

        if self.merge_batch().await?.should_shutdown() {
            return Ok(BatchOutcome::Interrupted);
        }
        batch.advance(BatchStatus::Merged)?;

        if self.commit_batch(&batch).await?.should_shutdown() {
            return Ok(BatchOutcome::Interrupted);
        }

        Ok(BatchOutcome::Committed)
    }

    async fn load_batch(&mut self, batch: &Batch) -> EtlResult<ShutdownResult<(), ()>> {
        let timeout = self.config.operation_timeout;

        self.set_phase(SyncPhase::Loading);
        let load = loop {
            let result = async {
                etl_fail_point(SYNC_PIPELINE__AFTER_WRITE)?;
                with_timeout(
                    timeout,
                    "staging load",
                    self.loader
                        .load_to_staging(&self.config.table, batch, &self.checkpoint),
                )
                .await
            }
            .await;

            match result {
                Ok(load) => break load,
                Err(err) => {
                    if self
                        .handle_stage_failure(SyncPhase::Loading, err)
                        .await?
                        .should_shutdown()
                    {
                        return Ok(ShutdownResult::Shutdown(()));
                    }
                }
            }
        };
        self.succeeded();

        let StagingLoad::Loaded { .. } = load else {
            return Ok(ShutdownResult::Ok(()));
        };

        let mut next = self.checkpoint.clone();
        if !next.record_staged(batch, self.config.max_ledger_entries) {
            return Ok(ShutdownResult::Ok(()));
        }

        let table_id = self.table_id();
        loop {
            let result = with_timeout(
                timeout,
                "checkpoint save",
                self.checkpoint_store.save_checkpoint(&table_id, &next),
            )
            .await;

            match result {
                Ok(()) => break,
                Err(err) => {
                    if self
                        .handle_stage_failure(SyncPhase::Loading, err)
                        .await?
                        .should_shutdown()
                    {
                        return Ok(ShutdownResult::Shutdown(()));
                    }
                }
            }
        }
        self.succeeded();
        self.checkpoint = next;

        Ok(ShutdownResult::Ok(()))
    }

    async fn merge_batch(&mut self) -> EtlResult<ShutdownResult<(), ()>> {
        let timeout = self.config.operation_timeout;

        self.set_phase(SyncPhase::Materializing);
        loop {
            let result = async {
                etl_fail_point(SYNC_PIPELINE__AFTER_STAGING)?;
                with_timeout(
                    timeout,
                    "merge",
                    self.materializer.materialize(&self.config.table),
                )
                .await
            }
            .await;

            match result {
                Ok(_) => break,
                Err(err) => {
                    if self
                        .handle_stage_failure(SyncPhase::Materializing, err)
                        .await?
                        .should_shutdown()
                    {
                        return Ok(ShutdownResult::Shutdown(()));
                    }
                }
            }
        }
        self.succeeded();

        Ok(ShutdownResult::Ok(()))
    }

    async fn commit_batch(&mut self, batch: &Batch) -> EtlResult<ShutdownResult<(), ()>> {
        let timeout = self.config.operation_timeout;
        let table_id = self.table_id();

        self.set_phase(SyncPhase::Checkpointing);
        let mut next = self.checkpoint.clone();
        next.commit_merge(batch)?;

        loop {
            let result = async {
                etl_fail_point(SYNC_PIPELINE__AFTER_MERGE)?;
                with_timeout(
                    timeout,
                    "checkpoint save",
                    self.checkpoint_store.save_checkpoint(&table_id, &next),
                )
                .await
            }
            .await;

            match result {
                Ok(()) => break,
                Err(err) => {
                    if self
                        .handle_stage_failure(SyncPhase::Checkpointing, err)
                        .await?
                        .should_shutdown()
                    {
                        return Ok(ShutdownResult::Shutdown(()));
                    }
                }
            }
        }
        self.succeeded();

        info!(
            batch_id = %batch.id(),
            high_watermark = ?next.high_watermark,
            "checkpoint committed"
        );
        self.adopt_checkpoint(next);
        self.set_phase(SyncPhase::Idle);

        Ok(ShutdownResult::Ok(()))
    }

    /// Classifies a stage failure and waits before the stage is re-entered.
    ///
    /// Returns the error when it is fatal, and [`ShutdownResult::Shutdown`] when shutdown was
    /// requested instead of waiting.
    async fn handle_stage_failure(
        &mut self,
        stage: SyncPhase,
        err: EtlError,
    ) -> EtlResult<ShutdownResult<(), ()>> {
        let policy = build_error_policy(&err);
        if policy.is_fatal() {
            error!(
                %stage,
                error = %err,
                solution = policy.solution().unwrap_or_default(),
                "stage failed with a fatal error"
            );
            return Err(err);
        }

        let outcome = self.retry.record_failure();
        let failures = self.retry.consecutive_failures();
        let message = err.to_string();
        self.status_tx.send_modify(|status| {
            status.consecutive_failures = failures;
            status.last_error = Some(message);
        });

        if self.shutdown_requested() {
            info!(%stage, error = %err, "stage failed during shutdown, stopping without retry");
            return Ok(ShutdownResult::Shutdown(()));
        }

        match outcome {
            FailureOutcome::Backoff(delay) => {
                warn!(
                    %stage,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "stage failed, retrying"
                );

                if sleep_or_shutdown(delay, &mut self.shutdown_rx)
                    .await
                    .should_shutdown()
                {
                    self.shutting_down = true;
                    return Ok(ShutdownResult::Shutdown(()));
                }
            }
            FailureOutcome::OpenCircuit(cooldown) => {
                let cooldown_left =
                    ChronoDuration::from_std(cooldown).unwrap_or(ChronoDuration::zero());
                let reopen_at = Utc::now() + cooldown_left;
                error!(
                    %stage,
                    consecutive_failures = failures,
                    cooldown_ms = cooldown.as_millis() as u64,
                    error = %err,
                    "circuit opened"
                );

                self.status_tx
                    .send_modify(|status| status.circuit_open_until = Some(reopen_at));
                self.set_phase(SyncPhase::CircuitOpen);

                if sleep_or_shutdown(cooldown, &mut self.shutdown_rx)
                    .await
                    .should_shutdown()
                {
                    self.shutting_down = true;
                    return Ok(ShutdownResult::Shutdown(()));
                }

                self.retry.half_open();
                self.status_tx
                    .send_modify(|status| status.circuit_open_until = None);
                info!(%stage, "circuit half-open, retrying stage");
            }
        }

        self.set_phase(stage);

        Ok(ShutdownResult::Ok(()))
    }

    fn shutdown_requested(&mut self) -> bool {
        if !self.shutting_down && shutdown_pending(&self.shutdown_rx) {
            info!("shutdown requested");
            self.shutting_down = true;
        }

        self.shutting_down
    }

    fn succeeded(&mut self) {
        if self.retry.consecutive_failures() == 0 {
            return;
        }

        self.retry.record_success();
        self.status_tx
            .send_modify(|status| status.consecutive_failures = 0);
    }

    fn adopt_checkpoint(&mut self, checkpoint: Checkpoint) {
        let high_watermark = checkpoint.high_watermark.clone();
        let committed_at = checkpoint.committed_at;
        self.status_tx.send_modify(|status| {
            status.high_watermark = high_watermark;
            status.last_checkpoint_at = committed_at;
        });

        self.checkpoint = checkpoint;
    }

    fn set_phase(&mut self, next: SyncPhase) {
        if self.phase == next {
            return;
        }

        if !self.phase.can_transition_to(next) {
            warn!(from = %self.phase, to = %next, "unexpected sync phase transition");
        }

        debug!(from = %self.phase, to = %next, "sync phase changing");
        self.phase = next;
        self.status_tx.send_modify(|status| status.phase = next);
    }
}
