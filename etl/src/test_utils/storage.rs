use bytes::Bytes;

use crate::error::{ErrorKind, EtlResult};
use crate::storage::ObjectStore;
use crate::test_utils::faults::FaultInjector;

/// [`ObjectStore`] that fails puts or gets on demand.
#[derive(Debug, Clone)]
pub struct FaultyObjectStore<O> {
    inner: O,
    puts: FaultInjector,
    gets: FaultInjector,
}

impl<O> FaultyObjectStore<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            puts: FaultInjector::new(),
            gets: FaultInjector::new(),
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn fail_next_puts(&self, count: u32) {
        self.puts.fail_next(count);
    }

    pub fn fail_next_gets(&self, count: u32) {
        self.gets.fail_next(count);
    }

    pub fn put_faults(&self) -> &FaultInjector {
        &self.puts
    }
}

impl<O> ObjectStore for FaultyObjectStore<O>
where
    O: ObjectStore + Sync,
{
    fn name() -> &'static str {
        "faulty"
    }

    async fn put(&self, path: &str, bytes: Bytes) -> EtlResult<()> {
        self.puts.check(ErrorKind::IoError, "object put")?;
        self.inner.put(path, bytes).await
    }

    async fn get(&self, path: &str) -> EtlResult<Bytes> {
        self.gets.check(ErrorKind::IoError, "object get")?;
        self.inner.get(path).await
    }

    async fn list(&self, prefix: &str) -> EtlResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, path: &str) -> EtlResult<()> {
        self.inner.delete(path).await
    }
}
