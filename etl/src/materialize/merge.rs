use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::concurrency::lease::TableLeases;
use crate::destination::{DestinationTables, MergeOutcome, MergeStatement, TargetRow, Warehouse};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::types::{ChangeEvent, ChangeOperation, PrimaryKey, SourceTableRef};

/// Newest staged changes of one primary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyResolution {
    pub latest_upsert: Option<ChangeEvent>,
    pub latest_delete: Option<ChangeEvent>,
}

/// Groups staged changes by primary key, keeping the newest upsert and delete of each.
///
/// Duplicates from retried loads or overlapping batches collapse here.
pub fn resolve_staged_changes(
    changes: impl IntoIterator<Item = ChangeEvent>,
) -> BTreeMap<PrimaryKey, KeyResolution> {
    let mut resolved: BTreeMap<PrimaryKey, KeyResolution> = BTreeMap::new();

    for change in changes {
        let resolution = resolved.entry(change.key.clone()).or_default();
        let slot = match change.operation {
            ChangeOperation::Upsert => &mut resolution.latest_upsert,
            ChangeOperation::Delete => &mut resolution.latest_delete,
        };

        if slot
            .as_ref()
            .is_none_or(|current| current.token < change.token)
        {
            *slot = Some(change);
        }
    }

    resolved
}

/// Applies the resolution of one key to its target row.
///
/// An upsert wins over a row with an older token and clears the deleted marker. A delete
/// wins over an older row, and over a live row with the same token, and keeps the row's
/// payload. Deleting a row that does not exist does nothing.
pub fn apply_resolution(
    row: &mut Option<TargetRow>,
    key: PrimaryKey,
    resolution: KeyResolution,
    outcome: &mut MergeOutcome,
) {
    let merged_at = Utc::now();

    if let Some(upsert) = resolution.latest_upsert {
        let applies = row
            .as_ref()
            .is_none_or(|current| current.token < upsert.token);

        if applies {
            *row = Some(TargetRow {
                key,
                payload: upsert.payload,
                token: upsert.token,
                deleted: false,
                ingested_at: upsert.ingested_at,
                merged_at,
            });
            outcome.upserted += 1;
        }
    }

    if let Some(delete) = resolution.latest_delete
        && let Some(current) = row.as_mut()
    {
        let applies = current.token < delete.token
            || (current.token == delete.token && !current.deleted);

        if applies {
            current.deleted = true;
            current.token = delete.token;
            current.ingested_at = delete.ingested_at;
            current.merged_at = merged_at;
            outcome.deleted += 1;
        }
    }
}

/// Merges staged `changes` into `target`.
///
/// Running it again over changes that were already merged leaves `target` unchanged.
pub fn merge_changes(
    target: &mut BTreeMap<PrimaryKey, TargetRow>,
    changes: Vec<ChangeEvent>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        staged_rows: changes.len() as u64,
        ..MergeOutcome::default()
    };

    for (key, resolution) in resolve_staged_changes(changes) {
        let mut row = target.remove(&key);
        apply_resolution(&mut row, key.clone(), resolution, &mut outcome);
        if let Some(row) = row {
            target.insert(key, row);
        }
    }

    outcome
}

fn merge_failed(err: EtlError) -> EtlError {
    match err.kind() {
        ErrorKind::InvalidData
        | ErrorKind::InvalidState
        | ErrorKind::ConfigError
        | ErrorKind::DeserializationError => err,
        _ => err.with_kind(ErrorKind::MergeFailed, "Merge into target table failed"),
    }
}

/// Reconciles a table's staging area into its target table.
///
/// Merges into the same target are serialized through the shared [`TableLeases`].
#[derive(Debug, Clone)]
pub struct MergeMaterializer<W> {
    warehouse: W,
    leases: TableLeases,
}

impl<W> MergeMaterializer<W>
where
    W: Warehouse,
{
    pub fn new(warehouse: W, leases: TableLeases) -> Self {
        Self { warehouse, leases }
    }

    /// Merges everything staged for `table`.
    ///
    /// Fails with [`ErrorKind::MergeFailed`] when the warehouse rejects the merge, in which
    /// case neither the target nor staging changed.
    pub async fn materialize(&self, table: &SourceTableRef) -> EtlResult<MergeOutcome> {
        let tables = DestinationTables::for_table(table);

        let lease = self.leases.acquire(&tables.target).await;
        debug!(target_table = lease.table(), "merge lease acquired");

        let outcome = self
            .warehouse
            .execute_merge(&MergeStatement::from(&tables))
            .await
            .map_err(merge_failed)?;

        info!(
            table_id = %table.id(),
            target_table = tables.target,
            staged_rows = outcome.staged_rows,
            upserted = outcome.upserted,
            deleted = outcome.deleted,
            "merged staging into target"
        );
        drop(lease);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowPayload;
    use serde_json::json;

    fn named(name: &str) -> RowPayload {
        json!({"id": 1, "name": name}).as_object().cloned().unwrap()
    }

    fn row<'a>(target: &'a BTreeMap<PrimaryKey, TargetRow>) -> &'a TargetRow {
        target.get(&PrimaryKey::from(1_i64)).unwrap()
    }

    #[test]
    fn keeps_payload_of_latest_upsert_and_marks_delete() {
        let mut target = BTreeMap::new();
        let outcome = merge_changes(
            &mut target,
            vec![
                ChangeEvent::upsert(1_i64, named("a"), 1),
                ChangeEvent::upsert(1_i64, named("b"), 2),
                ChangeEvent::delete(1_i64, 3),
            ],
        );

        let row = row(&target);
        assert_eq!(row.payload["name"], "b");
        assert!(row.deleted);
        assert_eq!(row.token.position, 3);
        assert_eq!(outcome.staged_rows, 3);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let newer = ChangeEvent::upsert(1_i64, named("new"), 2);
        let older = ChangeEvent::upsert(1_i64, named("old"), 1);

        let mut forward = BTreeMap::new();
        merge_changes(&mut forward, vec![older.clone()]);
        merge_changes(&mut forward, vec![newer.clone()]);

        let mut backward = BTreeMap::new();
        merge_changes(&mut backward, vec![newer]);
        merge_changes(&mut backward, vec![older]);

        assert_eq!(row(&forward).payload["name"], "new");
        assert_eq!(row(&backward).payload["name"], "new");
    }

    #[test]
    fn remerging_is_a_no_op() {
        let changes = vec![
            ChangeEvent::upsert(1_i64, named("a"), 5),
            ChangeEvent::delete(1_i64, 10),
        ];
        let mut target = BTreeMap::new();
        merge_changes(&mut target, changes.clone());
        let first = target.clone();

        let outcome = merge_changes(&mut target, changes);

        assert_eq!(outcome.upserted, 0);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(target, first);
    }

    #[test]
    fn late_upsert_does_not_resurrect_deleted_row() {
        let mut target = BTreeMap::new();
        merge_changes(
            &mut target,
            vec![
                ChangeEvent::upsert(1_i64, named("a"), 5),
                ChangeEvent::delete(1_i64, 10),
            ],
        );
        merge_changes(&mut target, vec![ChangeEvent::upsert(1_i64, named("late"), 7)]);

        let row = row(&target);
        assert!(row.deleted);
        assert_eq!(row.payload["name"], "a");
    }

    #[test]
    fn delete_wins_a_tie() {
        let mut target = BTreeMap::new();
        merge_changes(
            &mut target,
            vec![
                ChangeEvent::upsert(1_i64, named("a"), 4),
                ChangeEvent::delete(1_i64, 4),
            ],
        );

        assert!(row(&target).deleted);
    }

    #[test]
    fn deleting_a_missing_row_does_nothing() {
        let mut target = BTreeMap::new();
        let outcome = merge_changes(&mut target, vec![ChangeEvent::delete(1_i64, 4)]);

        assert!(target.is_empty());
        assert_eq!(outcome.deleted, 0);
    }
}
