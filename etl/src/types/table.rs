use std::fmt;

use config::shared::{SourceMode, TableConfig, destination_name};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, EtlError};
use crate::etl_error;

/// Stable identifier of a replicated table, `source_id.database.schema.table`.
///
/// Keys checkpoints, leases and pipeline statuses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTableId(String);

impl SourceTableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier of the table a configuration entry describes, valid or not.
    pub fn for_config(config: &TableConfig) -> Self {
        Self(format!(
            "{}.{}.{}.{}",
            config.source_id, config.database, config.schema, config.name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceTableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A replicated source table.
///
/// Built once from configuration when a pipeline starts and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTableRef {
    pub source_id: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    /// Primary key columns, never empty.
    pub primary_key: Vec<String>,
    pub cursor_column: Option<String>,
    pub mode: SourceMode,
    pub soft_delete_column: Option<String>,
}

impl SourceTableRef {
    pub fn id(&self) -> SourceTableId {
        SourceTableId(format!(
            "{}.{}.{}.{}",
            self.source_id, self.database, self.schema, self.table
        ))
    }

    /// Name fragment used for destination objects derived from this table.
    ///
    /// Distinct tables always get distinct names.
    pub fn destination_name(&self) -> String {
        destination_name(&self.source_id, &self.database, &self.schema, &self.table)
    }
}

impl TryFrom<&TableConfig> for SourceTableRef {
    type Error = EtlError;

    fn try_from(config: &TableConfig) -> Result<Self, Self::Error> {
        config.validate().map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid table configuration",
                err.to_string(),
                source: err
            )
        })?;

        Ok(Self {
            source_id: config.source_id.clone(),
            database: config.database.clone(),
            schema: config.schema.clone(),
            table: config.name.clone(),
            primary_key: config.primary_key.clone(),
            cursor_column: config.cursor_column.clone(),
            mode: config.mode,
            soft_delete_column: config.soft_delete_column.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(primary_key: Vec<String>) -> TableConfig {
        TableConfig {
            source_id: "crm".to_string(),
            database: "app".to_string(),
            schema: "public".to_string(),
            name: "accounts".to_string(),
            primary_key,
            cursor_column: Some("updated_at".to_string()),
            mode: SourceMode::Polling,
            soft_delete_column: None,
            batch: None,
        }
    }

    #[test]
    fn builds_ids_from_configuration() {
        let config = config(vec!["id".to_string()]);
        let table = SourceTableRef::try_from(&config).unwrap();

        assert_eq!(table.id().as_str(), "crm.app.public.accounts");
        assert_eq!(SourceTableId::for_config(&config), table.id());
        assert_eq!(table.destination_name(), "3_crm_3_app_6_public_8_accounts");
        assert_eq!(table.destination_name(), config.destination_name());
    }

    #[test]
    fn missing_primary_key_is_a_configuration_error() {
        let err = SourceTableRef::try_from(&config(vec![])).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
