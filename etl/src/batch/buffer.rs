use tokio::time::Instant;
use tracing::debug;

use crate::batch::writer::BatchWriter;
use crate::bail;
use crate::config::BatchSettings;
use crate::error::{ErrorKind, EtlResult};
use crate::storage::ObjectStore;
use crate::types::{Batch, ChangeEvent, OrderingToken, SourceTableRef};

/// In-memory accumulator of one table's events.
///
/// Owned by exactly one sync pipeline. Events are kept in arrival order, which is
/// non-decreasing token order.
#[derive(Debug)]
pub struct BatchBuffer {
    table: SourceTableRef,
    settings: BatchSettings,
    events: Vec<ChangeEvent>,
    /// When the oldest buffered event arrived.
    oldest_at: Option<Instant>,
}

impl BatchBuffer {
    pub fn new(table: SourceTableRef, settings: BatchSettings) -> Self {
        Self {
            table,
            settings,
            events: Vec::new(),
            oldest_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Token of the most recently buffered event.
    pub fn last_token(&self) -> Option<&OrderingToken> {
        self.events.last().map(|event| &event.token)
    }

    /// Appends `event`, which must not order before the last buffered one.
    pub fn push(&mut self, event: ChangeEvent) -> EtlResult<()> {
        if let Some(last) = self.last_token()
            && event.token < *last
        {
            bail!(
                ErrorKind::InvalidState,
                "Change events must arrive in token order",
                format!("event at {} arrived after {last}", event.token)
            );
        }

        if self.events.is_empty() {
            self.oldest_at = Some(Instant::now());
        }
        self.events.push(event);

        Ok(())
    }

    /// Returns `true` once the buffer reached its size threshold or its oldest event waited
    /// for the fill window. Never `true` for an empty buffer.
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.events.is_empty() {
            return false;
        }

        if self.events.len() >= self.settings.max_size {
            return true;
        }

        self.flush_deadline()
            .is_some_and(|deadline| now >= deadline)
    }

    /// Instant at which the fill window of the oldest event elapses.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.oldest_at
            .map(|oldest_at| oldest_at + self.settings.max_fill)
    }

    /// Number of events that can still be buffered before the size threshold is reached.
    pub fn remaining_capacity(&self) -> usize {
        self.settings.max_size.saturating_sub(self.events.len())
    }

    /// Writes the buffered events as one batch.
    ///
    /// The buffer is only cleared once the writer confirmed the artifact is durable. On
    /// failure it is left untouched so the flush can be retried. An empty buffer produces
    /// no batch.
    pub async fn flush<O>(&mut self, writer: &BatchWriter<O>) -> EtlResult<Option<Batch>>
    where
        O: ObjectStore,
    {
        if self.events.is_empty() {
            return Ok(None);
        }

        let batch = writer.write(&self.table, &self.events).await?;
        self.clear();

        debug!(table_id = %self.table.id(), batch_id = %batch.id(), "flushed batch buffer");

        Ok(Some(batch))
    }

    /// Drops every buffered event.
    pub fn clear(&mut self) {
        self.events.clear();
        self.oldest_at = None;
    }
}
