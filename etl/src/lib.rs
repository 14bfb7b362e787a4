//! Change capture replication from source tables into an analytical warehouse.
//!
//! Every configured table gets its own [`workers::sync::SyncPipeline`] which reads changes,
//! buffers them into batches, writes each batch as a Parquet artifact to object storage,
//! bulk loads it into a staging table and merges staging into the target table. Progress is
//! tracked per table in a [`state::checkpoint::Checkpoint`]. The [`orchestrator::Orchestrator`]
//! runs all pipelines and coordinates their shutdown.

pub mod artifact;
pub mod batch;
pub mod concurrency;
pub mod config;
pub mod destination;
pub mod error;
pub mod failpoints;
mod macros;
pub mod materialize;
pub mod orchestrator;
pub mod source;
pub mod state;
pub mod storage;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
