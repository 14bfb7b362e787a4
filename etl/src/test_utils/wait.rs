use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::state::phase::SyncStatus;
use crate::types::SourceTableId;

/// Longest a test waits for a condition before failing.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics once [`DEFAULT_WAIT_TIMEOUT`] elapsed, so a test fails instead of hanging.
pub async fn wait_until<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + DEFAULT_WAIT_TIMEOUT;

    loop {
        if condition().await {
            return;
        }

        if Instant::now() >= deadline {
            panic!("timed out after {DEFAULT_WAIT_TIMEOUT:?} waiting for {description}");
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Returns `true` if `table_id` has a status matching `predicate`.
pub fn status_matches<P>(
    statuses: &BTreeMap<SourceTableId, SyncStatus>,
    table_id: &SourceTableId,
    predicate: P,
) -> bool
where
    P: Fn(&SyncStatus) -> bool,
{
    statuses.get(table_id).is_some_and(predicate)
}
