use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::state::phase::SyncStatus;
use crate::types::SourceTableId;

/// Handle of a spawned sync pipeline.
///
/// Stays readable after the pipeline finished: the status receiver keeps the last published
/// status.
#[derive(Debug)]
pub struct SyncPipelineHandle {
    status: watch::Receiver<SyncStatus>,
    abort_handle: AbortHandle,
}

impl SyncPipelineHandle {
    pub fn new(status: watch::Receiver<SyncStatus>, abort_handle: AbortHandle) -> Self {
        Self {
            status,
            abort_handle,
        }
    }

    /// Returns the last status the pipeline published.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}

/// Pool of running sync pipelines, one per source table.
///
/// Handles and the join set are locked separately so statuses can be read while
/// [`SyncPipelinePool::wait_all`] is waiting.
#[derive(Debug, Clone, Default)]
pub struct SyncPipelinePool {
    handles: Arc<Mutex<HashMap<SourceTableId, SyncPipelineHandle>>>,
    join_set: Arc<Mutex<JoinSet<(SourceTableId, EtlResult<()>)>>>,
}

impl SyncPipelinePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` as the pipeline of `table_id`.
    ///
    /// A finished pipeline of the same table is replaced, a running one is kept and `future`
    /// is dropped.
    pub async fn spawn<F>(
        &self,
        table_id: SourceTableId,
        status: watch::Receiver<SyncStatus>,
        future: F,
    ) where
        F: Future<Output = EtlResult<()>> + Send + 'static,
    {
        let mut handles = self.handles.lock().await;

        if let Entry::Occupied(entry) = handles.entry(table_id.clone()) {
            if !entry.get().is_finished() {
                warn!(%table_id, "sync pipeline already running in pool");
                return;
            }

            entry.remove();
            debug!(%table_id, "replacing finished sync pipeline in pool");
        }

        let task_table_id = table_id.clone();
        let abort_handle = self.join_set.lock().await.spawn(async move {
            let result = future.await;
            (task_table_id, result)
        });

        handles.insert(table_id.clone(), SyncPipelineHandle::new(status, abort_handle));

        debug!(%table_id, "spawned sync pipeline in pool");
    }

    /// Snapshot of the last status of every pipeline ever spawned into the pool.
    pub async fn statuses(&self) -> BTreeMap<SourceTableId, SyncStatus> {
        self.handles
            .lock()
            .await
            .iter()
            .map(|(table_id, handle)| (table_id.clone(), handle.status()))
            .collect()
    }

    /// Waits for every pipeline to finish.
    ///
    /// Errors of all failed pipelines are aggregated. A panicking pipeline is reported as
    /// [`ErrorKind::SyncPipelinePanic`].
    pub async fn wait_all(&self) -> EtlResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut join_set = self.join_set.lock().await;
                join_set.join_next().await
            };

            let Some(result) = result else {
                break;
            };

            match result {
                Ok((table_id, pipeline_result)) => {
                    if let Err(err) = pipeline_result {
                        error!(%table_id, error = %err, "sync pipeline completed with error");
                        errors.push(err);
                    } else {
                        debug!(%table_id, "sync pipeline completed");
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("sync pipeline task was cancelled");
                    } else {
                        error!(error = %join_err, "sync pipeline panicked");
                        errors.push(etl_error!(
                            ErrorKind::SyncPipelinePanic,
                            "Sync pipeline panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}
