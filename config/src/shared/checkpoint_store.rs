use std::path::PathBuf;

use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Where per-table checkpoints are persisted.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStoreConfig {
    /// Checkpoints are lost on restart.
    #[default]
    Memory,
    /// One JSON document per table inside `directory`.
    Filesystem { directory: PathBuf },
    /// One row per table in the `etl.checkpoints` table.
    Postgres { connection: PgConnectionConfig },
}

impl CheckpointStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            CheckpointStoreConfig::Postgres { connection } => connection.validate(),
            CheckpointStoreConfig::Memory | CheckpointStoreConfig::Filesystem { .. } => Ok(()),
        }
    }
}
