use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{ChangeEvent, OrderingToken, SourceTableId};

/// Namespace for content derived batch ids.
const BATCH_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8d3b_4c71_9e52_0b7d_a1f4_3c68);

/// Content derived identifier of a [`Batch`].
///
/// Two batches holding the same changes of the same table share an id, whenever they
/// were read. This makes a re-read after a crash recognizable by the staging ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn from_events(table_id: &SourceTableId, events: &[ChangeEvent]) -> EtlResult<Self> {
        let mut content = Vec::with_capacity(64 * events.len() + table_id.as_str().len());
        content.extend_from_slice(table_id.as_str().as_bytes());
        for event in events {
            content.push(b'\n');
            serde_json::to_writer(
                &mut content,
                &(event.operation, &event.token, &event.payload),
            )?;
        }

        Ok(Self(Uuid::new_v5(&BATCH_ID_NAMESPACE, &content)))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a batch, which only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Buffered,
    Written,
    Staged,
    Merged,
}

/// Inclusive range of ordering tokens covered by a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRange {
    pub min: OrderingToken,
    pub max: OrderingToken,
}

/// An immutable group of changes of one table, persisted as a single artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: BatchId,
    table_id: SourceTableId,
    token_range: TokenRange,
    event_count: usize,
    location: String,
    created_at: DateTime<Utc>,
    status: BatchStatus,
}

impl Batch {
    /// Records a batch whose artifact was durably written to `location`.
    pub fn written(
        id: BatchId,
        table_id: SourceTableId,
        token_range: TokenRange,
        event_count: usize,
        location: String,
    ) -> Self {
        Self {
            id,
            table_id,
            token_range,
            event_count,
            location,
            created_at: Utc::now(),
            status: BatchStatus::Written,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn table_id(&self) -> &SourceTableId {
        &self.table_id
    }

    pub fn token_range(&self) -> &TokenRange {
        &self.token_range
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Moves the batch to `next`, which must come strictly after the current status.
    pub fn advance(&mut self, next: BatchStatus) -> EtlResult<()> {
        if next <= self.status {
            bail!(
                ErrorKind::InvalidState,
                "Batch status can only move forward",
                format!("batch {} cannot go from {:?} to {:?}", self.id, self.status, next)
            );
        }

        self.status = next;
        Ok(())
    }
}
