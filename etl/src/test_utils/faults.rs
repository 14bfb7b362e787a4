use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

#[derive(Debug, Default)]
struct FaultState {
    remaining: u32,
    forever: bool,
    calls: u64,
    triggered: u64,
}

/// Shared switch deciding whether the next call of a wrapped operation fails.
///
/// Clones share state, so a test keeps one clone and hands the other to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<Mutex<FaultState>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next(&self, count: u32) {
        self.lock().remaining = count;
    }

    /// Makes every call fail until [`FaultInjector::heal`] is called.
    pub fn fail_forever(&self) {
        self.lock().forever = true;
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.remaining = 0;
        state.forever = false;
    }

    /// Number of calls that went through this injector so far.
    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    /// Number of calls that were made to fail so far.
    pub fn triggered(&self) -> u64 {
        self.lock().triggered
    }

    /// Fails with `kind` if a fault is armed, consuming one planned failure.
    pub fn check(&self, kind: ErrorKind, operation: &'static str) -> EtlResult<()> {
        let mut state = self.lock();
        state.calls += 1;

        let fail = if state.forever {
            true
        } else if state.remaining > 0 {
            state.remaining -= 1;
            true
        } else {
            false
        };

        if !fail {
            return Ok(());
        }

        state.triggered += 1;

        Err(etl_error!(
            kind,
            "Injected failure",
            format!("{operation} was configured to fail")
        ))
    }
}
