//! Replicator binary.
//!
//! Syncs the configured source tables into the configured warehouse until interrupted.

use telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::load_replicator_config;
use crate::core::start_replicator;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let replicator_config = load_replicator_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    info!(
        pipeline_id = replicator_config.pipeline.id,
        tables = replicator_config.pipeline.tables.len(),
        "starting replicator"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            if let Err(err) = start_replicator(replicator_config).await {
                error!("{err:#}");
                return Err(err);
            }

            Ok(())
        })
}
