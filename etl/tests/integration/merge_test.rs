use etl::batch::writer::BatchWriter;
use etl::concurrency::lease::TableLeases;
use etl::destination::memory::MemoryWarehouse;
use etl::destination::{DdlStatement, DestinationTables, TargetRow, Warehouse};
use etl::materialize::merge::MergeMaterializer;
use etl::materialize::staging::{StagingLoad, StagingLoader};
use etl::state::checkpoint::Checkpoint;
use etl::storage::memory::MemoryObjectStore;
use etl::test_utils::table::{named, test_table};
use etl::types::{Batch, ChangeEvent, PrimaryKey, SourceTableRef};
use telemetry::tracing::init_test_tracing;

struct MergeHarness {
    table: SourceTableRef,
    tables: DestinationTables,
    writer: BatchWriter<MemoryObjectStore>,
    warehouse: MemoryWarehouse<MemoryObjectStore>,
    loader: StagingLoader<MemoryWarehouse<MemoryObjectStore>>,
    materializer: MergeMaterializer<MemoryWarehouse<MemoryObjectStore>>,
}

impl MergeHarness {
    async fn new() -> Self {
        let table = test_table("accounts");
        let tables = DestinationTables::for_table(&table);
        let store = MemoryObjectStore::new();
        let warehouse = MemoryWarehouse::new(store.clone());

        warehouse
            .execute_ddl(&DdlStatement::CreateTargetTable {
                table: tables.target.clone(),
            })
            .await
            .unwrap();
        warehouse
            .execute_ddl(&DdlStatement::CreateStagingTable {
                table: tables.staging.clone(),
            })
            .await
            .unwrap();

        Self {
            table,
            tables,
            writer: BatchWriter::new(store),
            loader: StagingLoader::new(warehouse.clone()),
            materializer: MergeMaterializer::new(warehouse.clone(), TableLeases::new()),
            warehouse,
        }
    }

    async fn stage(&self, events: Vec<ChangeEvent>) -> Batch {
        let batch = self.writer.write(&self.table, &events).await.unwrap();
        let load = self
            .loader
            .load_to_staging(&self.table, &batch, &Checkpoint::default())
            .await
            .unwrap();
        assert_eq!(
            load,
            StagingLoad::Loaded {
                rows: events.len() as u64
            }
        );

        batch
    }

    async fn merge(&self) {
        self.materializer.materialize(&self.table).await.unwrap();
    }

    async fn row(&self, key: i64) -> TargetRow {
        self.warehouse
            .target_row(&self.tables.target, &PrimaryKey::from(key))
            .await
            .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn merging_the_same_batch_twice_is_a_no_op() {
    init_test_tracing();
    let harness = MergeHarness::new().await;

    let events = vec![
        ChangeEvent::upsert(1_i64, named("a"), 1),
        ChangeEvent::upsert(2_i64, named("b"), 2),
        ChangeEvent::delete(1_i64, 3),
    ];
    harness.stage(events.clone()).await;
    harness.merge().await;
    let after_first_merge = harness.warehouse.target_rows(&harness.tables.target).await;

    // Nothing staged anymore, merging again changes nothing.
    harness.merge().await;
    assert_eq!(
        harness.warehouse.target_rows(&harness.tables.target).await,
        after_first_merge
    );

    // Replaying the whole batch is absorbed as well.
    harness.stage(events).await;
    harness.merge().await;
    assert_eq!(
        harness.warehouse.target_rows(&harness.tables.target).await,
        after_first_merge
    );
    assert!(
        harness
            .warehouse
            .staged_rows(&harness.tables.staging)
            .await
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn newest_token_wins_regardless_of_merge_order() {
    init_test_tracing();
    let harness = MergeHarness::new().await;

    harness
        .stage(vec![ChangeEvent::upsert(1_i64, named("newer"), 2)])
        .await;
    harness.merge().await;

    harness
        .stage(vec![ChangeEvent::upsert(1_i64, named("older"), 1)])
        .await;
    harness.merge().await;

    let row = harness.row(1).await;
    assert_eq!(row.payload["name"], "newer");
    assert_eq!(row.token.position, 2);
    assert!(!row.deleted);
}

#[tokio::test(flavor = "multi_thread")]
async fn late_upsert_does_not_clear_the_deleted_marker() {
    init_test_tracing();
    let harness = MergeHarness::new().await;

    harness
        .stage(vec![
            ChangeEvent::upsert(1_i64, named("a"), 5),
            ChangeEvent::delete(1_i64, 10),
        ])
        .await;
    harness.merge().await;

    harness
        .stage(vec![ChangeEvent::upsert(1_i64, named("late"), 7)])
        .await;
    harness.merge().await;

    let row = harness.row(1).await;
    assert!(row.deleted);
    assert_eq!(row.token.position, 10);
    assert_eq!(row.payload["name"], "a");
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_staged_together_are_resolved_per_key() {
    init_test_tracing();
    let harness = MergeHarness::new().await;

    harness
        .stage(vec![
            ChangeEvent::upsert(1_i64, named("a1"), 1),
            ChangeEvent::upsert(2_i64, named("b1"), 2),
        ])
        .await;
    harness
        .stage(vec![
            ChangeEvent::upsert(1_i64, named("a2"), 3),
            ChangeEvent::delete(3_i64, 4),
        ])
        .await;
    harness.merge().await;

    let rows = harness.warehouse.target_rows(&harness.tables.target).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(harness.row(1).await.payload["name"], "a2");
    assert_eq!(harness.row(2).await.payload["name"], "b1");
}
