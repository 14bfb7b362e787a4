use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Where change events are read from.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// An empty in-process changelog, only useful for local runs.
    Memory,
    /// A Postgres database polled with keyset pagination.
    Postgres { connection: PgConnectionConfig },
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SourceConfig::Memory => Ok(()),
            SourceConfig::Postgres { connection } => connection.validate(),
        }
    }
}
