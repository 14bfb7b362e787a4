use etl::destination::DestinationTables;
use etl::destination::memory::MemoryWarehouse;
use etl::error::ErrorKind;
use etl::orchestrator::Orchestrator;
use etl::source::memory::MemoryChangeSource;
use etl::state::phase::SyncPhase;
use etl::storage::memory::MemoryObjectStore;
use etl::store::checkpoint::CheckpointStore;
use etl::store::checkpoint::memory::MemoryCheckpointStore;
use etl::test_utils::source::FaultyChangeSource;
use etl::test_utils::table::{
    create_test_table, named, test_pipeline_config, test_table, test_table_config,
};
use etl::test_utils::wait::{status_matches, wait_until};
use etl::test_utils::warehouse::FaultyWarehouse;
use etl::types::{ChangeEvent, PrimaryKey, SourceTableRef};
use telemetry::tracing::init_test_tracing;

type TestWarehouse = MemoryWarehouse<MemoryObjectStore>;

async fn wait_for_watermark(
    checkpoints: &MemoryCheckpointStore,
    table: &SourceTableRef,
    position: i64,
) {
    let table_id = table.id();
    wait_until("the checkpoint to reach the expected watermark", || {
        let table_id = table_id.clone();
        async move {
            checkpoints
                .get_checkpoint(&table_id)
                .await
                .unwrap()
                .and_then(|checkpoint| checkpoint.high_watermark)
                .is_some_and(|watermark| watermark.position == position)
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn upserts_followed_by_a_delete_leave_a_deleted_row() {
    init_test_tracing();
    let table = test_table("accounts");
    let source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = TestWarehouse::new(store.clone());

    create_test_table(&source, &table).await;
    source
        .push_changes(
            &table,
            vec![
                ChangeEvent::upsert(1_i64, named("a"), 1),
                ChangeEvent::upsert(1_i64, named("b"), 2),
                ChangeEvent::delete(1_i64, 3),
            ],
        )
        .await;

    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![test_table_config("accounts")]),
        source,
        store,
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();

    wait_for_watermark(&checkpoints, &table, 3).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    let target = DestinationTables::for_table(&table).target;
    let row = warehouse
        .target_row(&target, &PrimaryKey::from(1_i64))
        .await
        .unwrap();
    assert_eq!(row.payload["name"], "b");
    assert!(row.deleted);
    assert_eq!(row.token.position, 3);

    let checkpoint = checkpoints
        .get_checkpoint(&table.id())
        .await
        .unwrap()
        .unwrap();
    assert!(checkpoint.staging_ledger.is_empty());
    assert!(checkpoint.committed_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_sharing_a_cursor_value_are_not_skipped_across_pages() {
    init_test_tracing();
    let table = test_table("accounts");
    let source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = TestWarehouse::new(store.clone());

    // Every row carries the same cursor position, only the primary key orders them.
    create_test_table(&source, &table).await;
    source
        .push_changes(
            &table,
            (1..=7_i64)
                .map(|id| ChangeEvent::upsert(id, named(&format!("account-{id}")), 100))
                .collect(),
        )
        .await;

    let mut config = test_pipeline_config(vec![test_table_config("accounts")]);
    config.page_size = 2;
    let mut orchestrator =
        Orchestrator::new(config, source, store, checkpoints.clone(), warehouse.clone());
    orchestrator.start().await.unwrap();

    let target = DestinationTables::for_table(&table).target;
    let warehouse_ref = &warehouse;
    let target_ref = &target;
    wait_until("all rows to be merged", || async move {
        warehouse_ref.target_rows(target_ref).await.len() == 7
    })
    .await;
    wait_for_watermark(&checkpoints, &table, 100).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    let rows = warehouse.target_rows(&target).await;
    let keys: Vec<PrimaryKey> = rows.iter().map(|row| row.key.clone()).collect();
    let expected: Vec<PrimaryKey> = (1..=7_i64).map(PrimaryKey::from).collect();
    assert_eq!(keys, expected);

    let watermark = checkpoints
        .get_checkpoint(&table.id())
        .await
        .unwrap()
        .and_then(|checkpoint| checkpoint.high_watermark)
        .unwrap();
    assert_eq!(watermark.key, PrimaryKey::from(7_i64));
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_batch_is_replayed_after_restart() {
    init_test_tracing();
    let table = test_table("accounts");
    let events = vec![
        ChangeEvent::upsert(1_i64, named("a"), 1),
        ChangeEvent::upsert(2_i64, named("b"), 2),
        ChangeEvent::upsert(1_i64, named("c"), 3),
        ChangeEvent::delete(2_i64, 4),
    ];

    let source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = FaultyWarehouse::new(TestWarehouse::new(store.clone()));
    create_test_table(&source, &table).await;
    source.push_changes(&table, events.clone()).await;

    // First run: the batch gets staged but every merge fails.
    warehouse.merge_faults().fail_forever();
    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![test_table_config("accounts")]),
        source.clone(),
        store.clone(),
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();

    let checkpoints_ref = &checkpoints;
    let table_id = table.id();
    let table_id_ref = &table_id;
    wait_until("the batch to be recorded as staged", || async move {
        checkpoints_ref
            .get_checkpoint(table_id_ref)
            .await
            .unwrap()
            .is_some_and(|checkpoint| !checkpoint.staging_ledger.is_empty())
    })
    .await;
    let faults = warehouse.merge_faults().clone();
    wait_until("a merge to be attempted", || {
        let faults = faults.clone();
        async move { faults.triggered() > 0 }
    })
    .await;
    orchestrator.shutdown_and_wait().await.unwrap();

    let interrupted = checkpoints.get_checkpoint(&table_id).await.unwrap().unwrap();
    assert_eq!(interrupted.high_watermark, None);
    let target = DestinationTables::for_table(&table).target;
    assert!(warehouse.inner().target_rows(&target).await.is_empty());

    // Second run: the replayed batch is absorbed.
    warehouse.merge_faults().heal();
    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![test_table_config("accounts")]),
        source,
        store,
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();
    wait_for_watermark(&checkpoints, &table, 4).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    // Same outcome as an uninterrupted run over fresh collaborators.
    let reference_source = MemoryChangeSource::new();
    let reference_store = MemoryObjectStore::new();
    let reference_checkpoints = MemoryCheckpointStore::new();
    let reference_warehouse = TestWarehouse::new(reference_store.clone());
    create_test_table(&reference_source, &table).await;
    reference_source.push_changes(&table, events).await;

    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![test_table_config("accounts")]),
        reference_source,
        reference_store,
        reference_checkpoints.clone(),
        reference_warehouse.clone(),
    );
    orchestrator.start().await.unwrap();
    wait_for_watermark(&reference_checkpoints, &table, 4).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    let replayed = warehouse.inner().target_rows(&target).await;
    let reference = reference_warehouse.target_rows(&target).await;
    assert_eq!(replayed.len(), reference.len());
    for (replayed, reference) in replayed.iter().zip(reference.iter()) {
        assert_eq!(replayed.key, reference.key);
        assert_eq!(replayed.payload, reference.payload);
        assert_eq!(replayed.token, reference.token);
        assert_eq!(replayed.deleted, reference.deleted);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_table_opens_its_circuit_without_stalling_others() {
    init_test_tracing();
    let accounts = test_table("accounts");
    let orders = test_table("orders");

    let memory_source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = TestWarehouse::new(store.clone());

    for table in [&accounts, &orders] {
        create_test_table(&memory_source, table).await;
        memory_source
            .push_changes(table, vec![ChangeEvent::upsert(1_i64, named("x"), 1)])
            .await;
    }

    let source = FaultyChangeSource::new(memory_source).only_for_tables(&["accounts"]);
    source.read_faults().fail_forever();

    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![
            test_table_config("accounts"),
            test_table_config("orders"),
        ]),
        source.clone(),
        store,
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();

    // The healthy table advances while the failing one is reported as stalled.
    wait_for_watermark(&checkpoints, &orders, 1).await;
    let orchestrator_ref = &orchestrator;
    let accounts_id = accounts.id();
    let accounts_id_ref = &accounts_id;
    wait_until("the circuit of the failing table to open", || async move {
        let statuses = orchestrator_ref.statuses().await;
        status_matches(&statuses, accounts_id_ref, |status| {
            status.phase == SyncPhase::CircuitOpen && status.circuit_open_until.is_some()
        })
    })
    .await;

    let statuses = orchestrator.statuses().await;
    let accounts_status = &statuses[&accounts_id];
    assert!(accounts_status.is_stalled());
    assert!(accounts_status.consecutive_failures >= 3);
    assert!(accounts_status.last_error.is_some());
    assert_eq!(accounts_status.high_watermark, None);

    // Once the source recovers the circuit closes and the table catches up.
    source.read_faults().heal();
    wait_for_watermark(&checkpoints, &accounts, 1).await;

    let statuses = orchestrator.statuses().await;
    assert_eq!(statuses[&accounts_id].consecutive_failures, 0);
    assert!(!statuses[&accounts_id].is_stalled());

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_errors_only_stop_their_own_table() {
    init_test_tracing();
    let accounts = test_table("accounts");
    let orders = test_table("orders");

    let source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = TestWarehouse::new(store.clone());

    create_test_table(&source, &accounts).await;
    create_test_table(&source, &orders).await;
    // The cursor column of `orders` is gone, which cannot be fixed by retrying.
    source.drop_column(&orders, "updated_at").await;
    source
        .push_changes(&accounts, vec![ChangeEvent::upsert(1_i64, named("x"), 1)])
        .await;

    let mut invalid = test_table_config("invoices");
    invalid.primary_key.clear();

    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![
            test_table_config("accounts"),
            test_table_config("orders"),
            invalid,
        ]),
        source,
        store,
        checkpoints.clone(),
        warehouse,
    );
    orchestrator.start().await.unwrap();

    wait_for_watermark(&checkpoints, &accounts, 1).await;
    let orchestrator_ref = &orchestrator;
    let orders_id = orders.id();
    let orders_id_ref = &orders_id;
    wait_until("the misconfigured table to fail", || async move {
        let statuses = orchestrator_ref.statuses().await;
        status_matches(&statuses, orders_id_ref, |status| {
            status.phase == SyncPhase::Failed
        })
    })
    .await;

    let statuses = orchestrator.statuses().await;
    assert_eq!(statuses.len(), 3);
    assert_eq!(
        statuses[&test_table("invoices").id()].phase,
        SyncPhase::Failed
    );
    assert_ne!(statuses[&accounts.id()].phase, SyncPhase::Failed);

    let err = orchestrator.shutdown_and_wait().await.unwrap_err();
    let mut kinds = err.kinds();
    kinds.sort_by_key(|kind| format!("{kind:?}"));
    assert_eq!(
        kinds,
        vec![ErrorKind::ConfigError, ErrorKind::SourceSchemaMismatch]
    );
}

/// Waits until the source served at least two reads, the second one finding the table drained.
async fn wait_for_drained_read(source: &FaultyChangeSource<MemoryChangeSource>) {
    let faults = source.read_faults().clone();
    wait_until("the source to be drained", || {
        let faults = faults.clone();
        async move { faults.calls() >= 2 }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_commits_buffered_events() {
    init_test_tracing();
    let table = test_table("accounts");
    let memory_source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = TestWarehouse::new(store.clone());

    create_test_table(&memory_source, &table).await;
    memory_source
        .push_changes(
            &table,
            vec![
                ChangeEvent::upsert(1_i64, named("a"), 1),
                ChangeEvent::upsert(2_i64, named("b"), 2),
            ],
        )
        .await;
    let source = FaultyChangeSource::new(memory_source);

    // The fill window is far away, only the shutdown can trigger the flush.
    let mut config = test_pipeline_config(vec![test_table_config("accounts")]);
    config.batch.max_fill_ms = 3_600_000;
    let mut orchestrator = Orchestrator::new(
        config,
        source.clone(),
        store,
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();

    wait_for_drained_read(&source).await;
    assert!(checkpoints.get_checkpoint(&table.id()).await.unwrap().is_none());

    orchestrator.shutdown_and_wait().await.unwrap();

    let checkpoint = checkpoints.get_checkpoint(&table.id()).await.unwrap().unwrap();
    assert_eq!(checkpoint.high_watermark.unwrap().position, 2);
    let target = DestinationTables::for_table(&table).target;
    assert_eq!(warehouse.target_rows(&target).await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drops_buffered_events_when_flushing_is_disabled() {
    init_test_tracing();
    let table = test_table("accounts");
    let memory_source = MemoryChangeSource::new();
    let store = MemoryObjectStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let warehouse = TestWarehouse::new(store.clone());

    create_test_table(&memory_source, &table).await;
    memory_source
        .push_changes(&table, vec![ChangeEvent::upsert(1_i64, named("a"), 1)])
        .await;
    let source = FaultyChangeSource::new(memory_source);

    let mut config = test_pipeline_config(vec![test_table_config("accounts")]);
    config.batch.max_fill_ms = 3_600_000;
    config.flush_on_shutdown = false;
    let mut orchestrator = Orchestrator::new(
        config,
        source.clone(),
        store.clone(),
        checkpoints.clone(),
        warehouse,
    );
    orchestrator.start().await.unwrap();

    wait_for_drained_read(&source).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    assert!(checkpoints.get_checkpoint(&table.id()).await.unwrap().is_none());
    assert_eq!(store.object_count().await, 0);
}
