use crate::error::{ErrorKind, EtlResult};
use crate::source::{ChangeSource, SourceTableMetadata};
use crate::test_utils::faults::FaultInjector;
use crate::types::{ChangeEvent, OrderingToken, SourceTableRef};

/// [`ChangeSource`] whose reads fail with [`ErrorKind::SourceUnavailable`] on demand.
///
/// Reads of tables not in `only_tables` are never failed when the list is set.
#[derive(Debug, Clone)]
pub struct FaultyChangeSource<S> {
    inner: S,
    reads: FaultInjector,
    only_tables: Option<Vec<String>>,
}

impl<S> FaultyChangeSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: FaultInjector::new(),
            only_tables: None,
        }
    }

    /// Restricts injected read failures to the tables with the given names.
    pub fn only_for_tables(mut self, tables: &[&str]) -> Self {
        self.only_tables = Some(tables.iter().map(|table| table.to_string()).collect());
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn read_faults(&self) -> &FaultInjector {
        &self.reads
    }

    fn targets(&self, table: &SourceTableRef) -> bool {
        self.only_tables
            .as_ref()
            .is_none_or(|tables| tables.contains(&table.table))
    }
}

impl<S> ChangeSource for FaultyChangeSource<S>
where
    S: ChangeSource + Sync,
{
    fn name() -> &'static str {
        "faulty"
    }

    async fn connect(&self) -> EtlResult<()> {
        self.inner.connect().await
    }

    async fn discover(&self, table: &SourceTableRef) -> EtlResult<SourceTableMetadata> {
        self.inner.discover(table).await
    }

    async fn read_changes(
        &self,
        table: &SourceTableRef,
        since: Option<&OrderingToken>,
        max_events: usize,
    ) -> EtlResult<Vec<ChangeEvent>> {
        if self.targets(table) {
            self.reads.check(ErrorKind::SourceUnavailable, "source read")?;
        }

        self.inner.read_changes(table, since, max_events).await
    }
}
