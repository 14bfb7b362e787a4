use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// The warehouse receiving merged rows.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    Memory,
    Postgres {
        connection: PgConnectionConfig,
        /// Schema holding the target and staging tables.
        #[serde(default = "default_destination_schema")]
        schema: String,
    },
}

fn default_destination_schema() -> String {
    "analytics".to_string()
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DestinationConfig::Memory => Ok(()),
            DestinationConfig::Postgres { connection, schema } => {
                if schema.is_empty() {
                    return Err(ValidationError::invalid_field(
                        "destination.postgres.schema",
                        "must not be empty",
                    ));
                }

                connection.validate()
            }
        }
    }
}
