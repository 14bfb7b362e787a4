//! Exclusive leases on destination tables.
//!
//! Merges into one destination table must never overlap. Pipelines running in the same
//! orchestrator share a [`TableLeases`] registry and hold a [`TableLease`] for the duration
//! of a merge.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of per-table merge locks.
#[derive(Debug, Clone, Default)]
pub struct TableLeases {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held while merging into a destination table. Released on drop.
#[derive(Debug)]
pub struct TableLease {
    table: String,
    _guard: OwnedMutexGuard<()>,
}

impl TableLease {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl TableLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder merges into `table` and takes the lease.
    pub async fn acquire(&self, table: &str) -> TableLease {
        let lock = {
            let mut inner = self.inner.lock().await;
            inner
                .entry(table.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        debug!(table, "acquiring merge lease");
        let guard = lock.lock_owned().await;

        TableLease {
            table: table.to_owned(),
            _guard: guard,
        }
    }
}
