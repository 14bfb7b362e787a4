use std::time::Duration;

use etl::concurrency::lease::TableLeases;
use etl::config::TableConfig;
use etl::destination::memory::MemoryWarehouse;
use etl::destination::{DdlStatement, DestinationTables, Warehouse};
use etl::materialize::merge::MergeMaterializer;
use etl::orchestrator::Orchestrator;
use etl::source::memory::MemoryChangeSource;
use etl::state::checkpoint::Checkpoint;
use etl::storage::memory::MemoryObjectStore;
use etl::store::checkpoint::CheckpointStore;
use etl::store::checkpoint::filesystem::FilesystemCheckpointStore;
use etl::store::checkpoint::memory::MemoryCheckpointStore;
use etl::test_utils::table::{
    create_test_table, named, test_pipeline_config, test_table, test_table_config,
};
use etl::test_utils::wait::wait_until;
use etl::test_utils::warehouse::FaultyWarehouse;
use etl::types::{ChangeEvent, PrimaryKey, SourceTableId, SourceTableRef};
use telemetry::tracing::init_test_tracing;
use tokio::time::timeout;
use uuid::Uuid;

type TestWarehouse = FaultyWarehouse<MemoryWarehouse<MemoryObjectStore>>;

const MERGE_DELAY: Duration = Duration::from_millis(100);

async fn warehouse_with(tables: &[&SourceTableRef]) -> TestWarehouse {
    let warehouse = FaultyWarehouse::new(MemoryWarehouse::new(MemoryObjectStore::new()));
    for table in tables {
        let tables = DestinationTables::for_table(table);
        warehouse
            .execute_ddl(&DdlStatement::CreateTargetTable {
                table: tables.target,
            })
            .await
            .unwrap();
        warehouse
            .execute_ddl(&DdlStatement::CreateStagingTable {
                table: tables.staging,
            })
            .await
            .unwrap();
    }

    warehouse
}

fn in_schema(schema: &str, name: &str) -> (TableConfig, SourceTableRef) {
    let mut config = test_table_config(name);
    config.schema = schema.to_string();
    let mut table = test_table(name);
    table.schema = schema.to_string();

    (config, table)
}

#[tokio::test(flavor = "multi_thread")]
async fn merges_into_the_same_table_do_not_overlap() {
    init_test_tracing();
    let table = test_table("accounts");
    let warehouse = warehouse_with(&[&table]).await;
    warehouse.set_merge_delay(MERGE_DELAY);

    let leases = TableLeases::new();
    let first = MergeMaterializer::new(warehouse.clone(), leases.clone());
    let second = MergeMaterializer::new(warehouse.clone(), leases);

    let (a, b) = tokio::join!(first.materialize(&table), second.materialize(&table));
    a.unwrap();
    b.unwrap();

    assert_eq!(warehouse.max_concurrent_merges(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn merges_into_different_tables_run_concurrently() {
    init_test_tracing();
    let accounts = test_table("accounts");
    let orders = test_table("orders");
    let warehouse = warehouse_with(&[&accounts, &orders]).await;
    warehouse.set_merge_delay(MERGE_DELAY);

    let leases = TableLeases::new();
    let first = MergeMaterializer::new(warehouse.clone(), leases.clone());
    let second = MergeMaterializer::new(warehouse.clone(), leases);

    let (a, b) = tokio::join!(first.materialize(&accounts), second.materialize(&orders));
    a.unwrap();
    b.unwrap();

    assert_eq!(warehouse.max_concurrent_merges(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_saves_for_different_tables_do_not_block_each_other() {
    init_test_tracing();
    let directory = std::env::temp_dir().join(format!("etl-checkpoints-{}", Uuid::new_v4()));
    let leases = TableLeases::new();
    let store = FilesystemCheckpointStore::with_leases(directory.clone(), leases.clone());

    let accounts = SourceTableId::new("crm.app.public.accounts");
    let orders = SourceTableId::new("crm.app.public.orders");

    // Holding the lease of `accounts` stands in for a slow save of that table.
    let lease = leases.acquire(accounts.as_str()).await;

    let blocked = tokio::spawn({
        let store = store.clone();
        let accounts = accounts.clone();
        async move {
            store
                .save_checkpoint(&accounts, &Checkpoint::default())
                .await
        }
    });

    timeout(
        Duration::from_secs(5),
        store.save_checkpoint(&orders, &Checkpoint::default()),
    )
    .await
    .expect("saving another table waited for the held lease")
    .unwrap();
    assert!(!blocked.is_finished());

    drop(lease);
    timeout(Duration::from_secs(5), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let tracked = store.list_tracked_tables().await.unwrap();
    assert_eq!(tracked, vec![accounts, orders]);

    std::fs::remove_dir_all(&directory).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn tables_whose_names_join_alike_keep_separate_targets() {
    init_test_tracing();
    let (user_events_config, user_events) = in_schema("public", "user_events");
    let (events_config, events) = in_schema("public_user", "events");

    let user_events_target = DestinationTables::for_table(&user_events).target;
    let events_target = DestinationTables::for_table(&events).target;
    assert_ne!(user_events_target, events_target);

    let source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = MemoryWarehouse::new(store.clone());

    create_test_table(&source, &user_events).await;
    create_test_table(&source, &events).await;
    source
        .push_changes(
            &user_events,
            vec![ChangeEvent::upsert(1_i64, named("user-event"), 1)],
        )
        .await;
    source
        .push_changes(&events, vec![ChangeEvent::upsert(1_i64, named("event"), 1)])
        .await;

    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![user_events_config, events_config]),
        source,
        store,
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();

    let checkpoints_ref = &checkpoints;
    let table_ids = [user_events.id(), events.id()];
    let table_ids_ref = &table_ids;
    wait_until("both tables to commit their change", || async move {
        for table_id in table_ids_ref {
            let committed = checkpoints_ref
                .get_checkpoint(table_id)
                .await
                .unwrap()
                .and_then(|checkpoint| checkpoint.high_watermark)
                .is_some_and(|token| token.position == 1);
            if !committed {
                return false;
            }
        }
        true
    })
    .await;
    orchestrator.shutdown_and_wait().await.unwrap();

    let key = PrimaryKey::from(1_i64);
    let user_event = warehouse.target_row(&user_events_target, &key).await.unwrap();
    let event = warehouse.target_row(&events_target, &key).await.unwrap();
    assert_eq!(user_event.payload["name"], "user-event");
    assert_eq!(event.payload["name"], "event");
    assert_eq!(warehouse.target_rows(&user_events_target).await.len(), 1);
    assert_eq!(warehouse.target_rows(&events_target).await.len(), 1);
}
