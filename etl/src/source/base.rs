use std::future::Future;

use crate::error::EtlResult;
use crate::types::{ChangeEvent, OrderingToken, SourceTableRef};

/// Columns of a source table as observed by [`ChangeSource::discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTableMetadata {
    /// All columns of the table in ordinal order.
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub cursor_column: Option<String>,
}

/// A system changes are read from.
///
/// Implementations must return events in ascending [`OrderingToken`] order, never return an
/// event whose token is less than or equal to `since`, and never skip an event whose token
/// lies between two consecutive reads. Calling [`ChangeSource::read_changes`] again with the
/// token of the last returned event continues where the previous read stopped.
pub trait ChangeSource {
    /// Returns the name of the source kind.
    fn name() -> &'static str;

    /// Verifies the source is reachable.
    ///
    /// Fails with [`crate::error::ErrorKind::SourceUnavailable`] when it is not.
    fn connect(&self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Resolves the primary key and cursor columns of `table`.
    ///
    /// Fails with [`crate::error::ErrorKind::SourceSchemaMismatch`] when a declared column
    /// does not exist.
    fn discover(
        &self,
        table: &SourceTableRef,
    ) -> impl Future<Output = EtlResult<SourceTableMetadata>> + Send;

    /// Reads at most `max_events` changes of `table` that come strictly after `since`.
    ///
    /// An empty result means the table is currently drained.
    fn read_changes(
        &self,
        table: &SourceTableRef,
        since: Option<&OrderingToken>,
        max_events: usize,
    ) -> impl Future<Output = EtlResult<Vec<ChangeEvent>>> + Send;
}
