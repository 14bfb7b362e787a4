use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::destination::{
    ArtifactLocation, DdlStatement, MergeOutcome, MergeStatement, Warehouse,
};
use crate::error::{ErrorKind, EtlResult};
use crate::test_utils::faults::FaultInjector;

#[derive(Debug, Default)]
struct MergeTracker {
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// [`Warehouse`] whose staging loads and merges fail on demand.
///
/// Merges can also be slowed down, and the highest number of merges seen running at once is
/// recorded.
#[derive(Debug, Clone)]
pub struct FaultyWarehouse<W> {
    inner: W,
    loads: FaultInjector,
    merges: FaultInjector,
    tracker: Arc<MergeTracker>,
}

impl<W> FaultyWarehouse<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            loads: FaultInjector::new(),
            merges: FaultInjector::new(),
            tracker: Arc::default(),
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn load_faults(&self) -> &FaultInjector {
        &self.loads
    }

    pub fn merge_faults(&self) -> &FaultInjector {
        &self.merges
    }

    /// Holds every following merge open for `delay` before it runs.
    pub fn set_merge_delay(&self, delay: Duration) {
        *self.tracker.delay.lock().unwrap() = delay;
    }

    pub fn max_concurrent_merges(&self) -> usize {
        self.tracker.max_active.load(Ordering::SeqCst)
    }
}

impl<W> Warehouse for FaultyWarehouse<W>
where
    W: Warehouse + Sync,
{
    fn name() -> &'static str {
        "faulty"
    }

    async fn execute_ddl(&self, statement: &DdlStatement) -> EtlResult<()> {
        self.inner.execute_ddl(statement).await
    }

    async fn bulk_load(
        &self,
        staging_table: &str,
        artifacts: &[ArtifactLocation],
    ) -> EtlResult<u64> {
        self.loads.check(ErrorKind::DatabaseUnavailable, "staging load")?;
        self.inner.bulk_load(staging_table, artifacts).await
    }

    async fn execute_merge(&self, statement: &MergeStatement) -> EtlResult<MergeOutcome> {
        self.merges.check(ErrorKind::DatabaseQueryFailed, "merge")?;

        let active = self.tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.tracker.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.inner.execute_merge(statement).await;

        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
