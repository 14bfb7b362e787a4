use std::path::PathBuf;

use etl::artifact::ARTIFACT_EXTENSION;
use etl::batch::writer::table_prefix;
use etl::destination::DestinationTables;
use etl::destination::memory::MemoryWarehouse;
use etl::orchestrator::Orchestrator;
use etl::source::memory::MemoryChangeSource;
use etl::storage::ObjectStore;
use etl::storage::filesystem::FilesystemObjectStore;
use etl::store::checkpoint::CheckpointStore;
use etl::store::checkpoint::filesystem::FilesystemCheckpointStore;
use etl::test_utils::table::{
    create_test_table, named, test_pipeline_config, test_table, test_table_config,
};
use etl::test_utils::wait::wait_until;
use etl::types::{ChangeEvent, PrimaryKey};
use telemetry::tracing::init_test_tracing;
use uuid::Uuid;

fn temp_dir(kind: &str) -> PathBuf {
    std::env::temp_dir().join(format!("etl-{kind}-{}", Uuid::new_v4()))
}

#[tokio::test(flavor = "multi_thread")]
async fn artifacts_and_checkpoints_survive_on_disk() {
    init_test_tracing();
    let table = test_table("accounts");
    let artifacts_dir = temp_dir("artifacts");
    let checkpoints_dir = temp_dir("checkpoints");

    let source = MemoryChangeSource::new();
    let store = FilesystemObjectStore::new(artifacts_dir.clone()).unwrap();
    let checkpoints = FilesystemCheckpointStore::new(checkpoints_dir.clone());
    let warehouse = MemoryWarehouse::new(store.clone());

    create_test_table(&source, &table).await;
    source
        .push_changes(
            &table,
            vec![
                ChangeEvent::upsert(1_i64, named("a"), 1),
                ChangeEvent::upsert(2_i64, named("b"), 2),
            ],
        )
        .await;

    let mut orchestrator = Orchestrator::new(
        test_pipeline_config(vec![test_table_config("accounts")]),
        source,
        store.clone(),
        checkpoints.clone(),
        warehouse.clone(),
    );
    orchestrator.start().await.unwrap();

    let checkpoints_ref = &checkpoints;
    let table_id = table.id();
    let table_id_ref = &table_id;
    wait_until("the checkpoint to be committed", || async move {
        checkpoints_ref
            .get_checkpoint(table_id_ref)
            .await
            .unwrap()
            .and_then(|checkpoint| checkpoint.high_watermark)
            .is_some_and(|token| token.position == 2)
    })
    .await;
    orchestrator.shutdown_and_wait().await.unwrap();

    let artifacts = store.list(&table_prefix(&table)).await.unwrap();
    assert!(!artifacts.is_empty());
    assert!(
        artifacts
            .iter()
            .all(|path| path.ends_with(&format!(".{ARTIFACT_EXTENSION}")))
    );

    // A fresh store over the same directory sees the committed checkpoint.
    let reopened = FilesystemCheckpointStore::new(checkpoints_dir.clone());
    let checkpoint = reopened.get_checkpoint(&table_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.high_watermark.unwrap().key, PrimaryKey::from(2_i64));
    assert_eq!(reopened.list_tracked_tables().await.unwrap(), vec![table_id]);

    let target = DestinationTables::for_table(&table).target;
    assert_eq!(warehouse.target_rows(&target).await.len(), 2);

    std::fs::remove_dir_all(&artifacts_dir).unwrap();
    std::fs::remove_dir_all(&checkpoints_dir).unwrap();
}
