use config::shared::{
    CheckpointStoreConfig, DestinationConfig, ObjectStoreConfig, ReplicatorConfig, SourceConfig,
};
use etl::destination::Warehouse;
use etl::destination::memory::MemoryWarehouse;
use etl::destination::postgres::PostgresWarehouse;
use etl::orchestrator::Orchestrator;
use etl::source::ChangeSource;
use etl::source::memory::MemoryChangeSource;
use etl::source::postgres::PostgresPollingSource;
use etl::storage::ObjectStore;
use etl::storage::filesystem::FilesystemObjectStore;
use etl::storage::memory::MemoryObjectStore;
use etl::store::checkpoint::CheckpointStore;
use etl::store::checkpoint::filesystem::FilesystemCheckpointStore;
use etl::store::checkpoint::memory::MemoryCheckpointStore;
use etl::store::checkpoint::postgres::PostgresCheckpointStore;
use postgres::db::{connect_pool_lazy, migrate_etl_schema};
use tracing::{error, info, warn};

const SOURCE_APPLICATION_NAME: &str = "replicator_source";
const CHECKPOINT_APPLICATION_NAME: &str = "replicator_checkpoints";
const DESTINATION_APPLICATION_NAME: &str = "replicator_destination";

// Every combination of collaborators is statically dispatched. Each step resolves one of them
// from the configuration and hands it to the next.

pub async fn start_replicator(config: ReplicatorConfig) -> anyhow::Result<()> {
    match &config.source {
        SourceConfig::Memory => {
            warn!("using an in-memory source, no changes will be read");
            with_source(&config, MemoryChangeSource::new()).await
        }
        SourceConfig::Postgres { connection } => {
            let pool = connect_pool_lazy(connection, SOURCE_APPLICATION_NAME);
            with_source(&config, PostgresPollingSource::new(pool)).await
        }
    }
}

async fn with_source<S>(config: &ReplicatorConfig, source: S) -> anyhow::Result<()>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
{
    match &config.object_store {
        ObjectStoreConfig::Memory => {
            warn!("using an in-memory object store, artifacts will not survive a restart");
            with_object_store(config, source, MemoryObjectStore::new()).await
        }
        ObjectStoreConfig::Filesystem { root } => {
            let object_store = FilesystemObjectStore::new(root.clone())?;
            with_object_store(config, source, object_store).await
        }
    }
}

async fn with_object_store<S, O>(
    config: &ReplicatorConfig,
    source: S,
    object_store: O,
) -> anyhow::Result<()>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    O: ObjectStore + Clone + Send + Sync + 'static,
{
    match &config.checkpoint_store {
        CheckpointStoreConfig::Memory => {
            warn!("using an in-memory checkpoint store, every restart syncs from scratch");
            with_checkpoint_store(config, source, object_store, MemoryCheckpointStore::new())
                .await
        }
        CheckpointStoreConfig::Filesystem { directory } => {
            let checkpoint_store = FilesystemCheckpointStore::new(directory.clone());
            with_checkpoint_store(config, source, object_store, checkpoint_store).await
        }
        CheckpointStoreConfig::Postgres { connection } => {
            migrate_etl_schema(connection).await?;
            info!("checkpoint store migrations applied");

            let pool = connect_pool_lazy(connection, CHECKPOINT_APPLICATION_NAME);
            let checkpoint_store = PostgresCheckpointStore::new(config.pipeline.id, pool);
            with_checkpoint_store(config, source, object_store, checkpoint_store).await
        }
    }
}

async fn with_checkpoint_store<S, O, C>(
    config: &ReplicatorConfig,
    source: S,
    object_store: O,
    checkpoint_store: C,
) -> anyhow::Result<()>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    O: ObjectStore + Clone + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    match &config.destination {
        DestinationConfig::Memory => {
            let warehouse = MemoryWarehouse::new(object_store.clone());
            run_orchestrator(config, source, object_store, checkpoint_store, warehouse).await
        }
        DestinationConfig::Postgres { connection, schema } => {
            let pool = connect_pool_lazy(connection, DESTINATION_APPLICATION_NAME);
            let warehouse = PostgresWarehouse::new(pool, schema.clone(), object_store.clone());
            run_orchestrator(config, source, object_store, checkpoint_store, warehouse).await
        }
    }
}

async fn run_orchestrator<S, O, C, W>(
    config: &ReplicatorConfig,
    source: S,
    object_store: O,
    checkpoint_store: C,
    warehouse: W,
) -> anyhow::Result<()>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    O: ObjectStore + Clone + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
    W: Warehouse + Clone + Send + Sync + 'static,
{
    info!(
        source = S::name(),
        object_store = O::name(),
        checkpoint_store = C::name(),
        warehouse = W::name(),
        "collaborators resolved"
    );

    let mut orchestrator = Orchestrator::new(
        config.pipeline.clone(),
        source,
        object_store,
        checkpoint_store,
        warehouse,
    );
    orchestrator.start().await?;

    // Spawn a task to listen for Ctrl+C and trigger shutdown.
    let shutdown_tx = orchestrator.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {:?}", err);
            return;
        }

        info!("Ctrl+C received, shutting down sync pipelines");
        if let Err(err) = shutdown_tx.shutdown() {
            warn!("failed to send shutdown signal: {:?}", err);
        }
    });

    let result = orchestrator.wait().await;

    // The pipelines may all have stopped on their own before Ctrl+C.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    info!("replicator stopped");

    Ok(())
}
