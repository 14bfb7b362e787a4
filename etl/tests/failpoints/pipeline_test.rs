use etl::destination::DestinationTables;
use etl::destination::memory::MemoryWarehouse;
use etl::error::ErrorKind;
use etl::failpoints::{
    SYNC_PIPELINE__AFTER_MERGE, SYNC_PIPELINE__AFTER_STAGING, SYNC_PIPELINE__AFTER_WRITE,
};
use etl::orchestrator::Orchestrator;
use etl::source::memory::MemoryChangeSource;
use etl::storage::memory::MemoryObjectStore;
use etl::store::checkpoint::CheckpointStore;
use etl::store::checkpoint::memory::MemoryCheckpointStore;
use etl::test_utils::table::{
    create_test_table, named, test_pipeline_config, test_table, test_table_config,
};
use etl::test_utils::wait::wait_until;
use etl::types::{ChangeEvent, PrimaryKey, SourceTableRef};
use fail::FailScenario;
use telemetry::tracing::init_test_tracing;

type TestWarehouse = MemoryWarehouse<MemoryObjectStore>;

struct Collaborators {
    source: MemoryChangeSource,
    store: MemoryObjectStore,
    checkpoints: MemoryCheckpointStore,
    warehouse: TestWarehouse,
}

impl Collaborators {
    async fn with_changes(table: &SourceTableRef) -> Self {
        let source = MemoryChangeSource::new();
        let store = MemoryObjectStore::new();

        create_test_table(&source, table).await;
        source
            .push_changes(
                table,
                vec![
                    ChangeEvent::upsert(1_i64, named("a"), 1),
                    ChangeEvent::upsert(1_i64, named("b"), 2),
                    ChangeEvent::delete(1_i64, 3),
                    ChangeEvent::upsert(2_i64, named("c"), 4),
                ],
            )
            .await;

        Self {
            source,
            checkpoints: MemoryCheckpointStore::new(),
            warehouse: TestWarehouse::new(store.clone()),
            store,
        }
    }

    fn orchestrator(
        &self,
    ) -> Orchestrator<MemoryChangeSource, MemoryObjectStore, MemoryCheckpointStore, TestWarehouse>
    {
        Orchestrator::new(
            test_pipeline_config(vec![test_table_config("accounts")]),
            self.source.clone(),
            self.store.clone(),
            self.checkpoints.clone(),
            self.warehouse.clone(),
        )
    }

    async fn wait_for_watermark(&self, table: &SourceTableRef, position: i64) {
        let checkpoints = &self.checkpoints;
        let table_id = table.id();
        let table_id = &table_id;
        wait_until("the checkpoint to be committed", || async move {
            checkpoints
                .get_checkpoint(table_id)
                .await
                .unwrap()
                .and_then(|checkpoint| checkpoint.high_watermark)
                .is_some_and(|token| token.position == position)
        })
        .await;
    }

    async fn assert_fully_merged(&self, table: &SourceTableRef) {
        let target = DestinationTables::for_table(table).target;

        let deleted = self
            .warehouse
            .target_row(&target, &PrimaryKey::from(1_i64))
            .await
            .unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.payload["name"], "b");

        let live = self
            .warehouse
            .target_row(&target, &PrimaryKey::from(2_i64))
            .await
            .unwrap();
        assert!(!live.deleted);
        assert_eq!(live.payload["name"], "c");

        let checkpoint = self
            .checkpoints
            .get_checkpoint(&table.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.high_watermark.unwrap().position, 4);
        assert!(checkpoint.staging_ledger.is_empty());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_after_staging_is_recovered_on_restart() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(SYNC_PIPELINE__AFTER_STAGING, "return(no_retry)").unwrap();

    let table = test_table("accounts");
    let collaborators = Collaborators::with_changes(&table).await;

    let mut orchestrator = collaborators.orchestrator();
    orchestrator.start().await.unwrap();
    let err = orchestrator.wait().await.unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::WithNoRetry]);

    // The batch is staged and recorded, but nothing was merged.
    let checkpoint = collaborators
        .checkpoints
        .get_checkpoint(&table.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.high_watermark, None);
    assert_eq!(checkpoint.staging_ledger.len(), 1);
    let tables = DestinationTables::for_table(&table);
    assert_eq!(collaborators.warehouse.staged_rows(&tables.staging).await.len(), 4);
    assert!(collaborators.warehouse.target_rows(&tables.target).await.is_empty());

    fail::remove(SYNC_PIPELINE__AFTER_STAGING);

    let mut orchestrator = collaborators.orchestrator();
    orchestrator.start().await.unwrap();
    collaborators.wait_for_watermark(&table, 4).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    collaborators.assert_fully_merged(&table).await;

    scenario.teardown();
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_after_write_rereads_from_the_checkpoint() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(SYNC_PIPELINE__AFTER_WRITE, "return(no_retry)").unwrap();

    let table = test_table("accounts");
    let collaborators = Collaborators::with_changes(&table).await;

    let mut orchestrator = collaborators.orchestrator();
    orchestrator.start().await.unwrap();
    let err = orchestrator.wait().await.unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::WithNoRetry]);

    // The artifact is durable but the checkpoint never moved.
    assert_eq!(collaborators.store.object_count().await, 1);
    assert!(
        collaborators
            .checkpoints
            .get_checkpoint(&table.id())
            .await
            .unwrap()
            .is_none()
    );

    fail::remove(SYNC_PIPELINE__AFTER_WRITE);

    let mut orchestrator = collaborators.orchestrator();
    orchestrator.start().await.unwrap();
    collaborators.wait_for_watermark(&table, 4).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    collaborators.assert_fully_merged(&table).await;

    scenario.teardown();
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_failure_after_merge_only_retries_the_checkpoint() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(SYNC_PIPELINE__AFTER_MERGE, "2*return(retry)").unwrap();

    let table = test_table("accounts");
    let collaborators = Collaborators::with_changes(&table).await;

    let mut orchestrator = collaborators.orchestrator();
    orchestrator.start().await.unwrap();
    collaborators.wait_for_watermark(&table, 4).await;
    orchestrator.shutdown_and_wait().await.unwrap();

    collaborators.assert_fully_merged(&table).await;
    assert_eq!(collaborators.warehouse.merge_count().await, 1);

    scenario.teardown();
}
