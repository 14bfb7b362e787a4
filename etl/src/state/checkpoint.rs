use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Batch, BatchId, BatchStatus, OrderingToken};

/// A batch whose rows were loaded into staging but not merged yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub batch_id: BatchId,
    pub location: String,
    pub max_token: OrderingToken,
    pub staged_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn for_batch(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id(),
            location: batch.location().to_owned(),
            max_token: batch.token_range().max.clone(),
            staged_at: Utc::now(),
        }
    }
}

/// Bounded record of staged-but-unmerged batches.
///
/// Entries are only removed once a merge commits. When the ledger is full new entries are
/// not recorded, which at worst causes a duplicate load that the merge absorbs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagingLedger {
    entries: Vec<LedgerEntry>,
}

impl StagingLedger {
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, batch_id: BatchId) -> bool {
        self.entries.iter().any(|entry| entry.batch_id == batch_id)
    }

    /// Records `entry`, returning whether the ledger changed.
    pub fn record(&mut self, entry: LedgerEntry, max_entries: usize) -> bool {
        if self.contains(entry.batch_id) {
            return false;
        }

        if self.entries.len() >= max_entries {
            warn!(
                batch_id = %entry.batch_id,
                max_entries,
                "staging ledger is full, batch will not be recorded"
            );
            return false;
        }

        self.entries.push(entry);
        true
    }

    /// Drops every entry, called once a merge has committed all staged rows.
    fn clear(&mut self) -> usize {
        let pruned = self.entries.len();
        self.entries.clear();
        pruned
    }
}

/// Durable progress of one source table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Greatest token known to be fully merged into the target.
    pub high_watermark: Option<OrderingToken>,
    pub last_batch_id: Option<BatchId>,
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub staging_ledger: StagingLedger,
}

impl Checkpoint {
    /// Records that `batch` was loaded into staging.
    pub fn record_staged(&mut self, batch: &Batch, max_entries: usize) -> bool {
        self.staging_ledger
            .record(LedgerEntry::for_batch(batch), max_entries)
    }

    pub fn is_staged(&self, batch_id: BatchId) -> bool {
        self.staging_ledger.contains(batch_id)
    }

    /// Advances the checkpoint after `batch` was merged.
    ///
    /// The merge cleared staging, so the whole ledger is pruned. Fails with
    /// [`ErrorKind::InvalidState`] unless `batch` reached [`BatchStatus::Merged`].
    pub fn commit_merge(&mut self, batch: &Batch) -> EtlResult<()> {
        if batch.status() != BatchStatus::Merged {
            bail!(
                ErrorKind::InvalidState,
                "Only merged batches can be committed",
                format!("batch {} is {:?}", batch.id(), batch.status())
            );
        }

        let merged = &batch.token_range().max;
        if let Some(current) = &self.high_watermark
            && merged < current
        {
            bail!(
                ErrorKind::InvalidState,
                "High watermark cannot move backwards",
                format!("batch {} ends at {merged}, checkpoint is at {current}", batch.id())
            );
        }

        self.high_watermark = Some(merged.clone());
        self.last_batch_id = Some(batch.id());
        self.committed_at = Some(Utc::now());
        self.staging_ledger.clear();

        Ok(())
    }
}

/// Checks that replacing `current` with `next` does not move the high watermark backwards.
///
/// Every checkpoint store calls this under its per-table lock before saving.
pub fn validate_checkpoint_update(
    current: Option<&Checkpoint>,
    next: &Checkpoint,
) -> EtlResult<()> {
    let Some(current_watermark) = current.and_then(|checkpoint| checkpoint.high_watermark.as_ref())
    else {
        return Ok(());
    };

    match &next.high_watermark {
        Some(next_watermark) if next_watermark >= current_watermark => Ok(()),
        Some(next_watermark) => bail!(
            ErrorKind::InvalidState,
            "High watermark cannot move backwards",
            format!("stored watermark {current_watermark}, attempted {next_watermark}")
        ),
        None => bail!(
            ErrorKind::InvalidState,
            "High watermark cannot be cleared",
            format!("stored watermark {current_watermark}")
        ),
    }
}
