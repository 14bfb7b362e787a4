use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, ValidationError};

/// How changes are captured from a source table.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// The table is queried repeatedly on an interval using its cursor column.
    #[default]
    Polling,
    /// Changes are read continuously from the source's change log.
    LogBased,
}

/// Builds the name of the destination objects of a source table from its name parts.
///
/// Every part is prefixed with its byte length, so distinct part tuples never map to the same
/// name even when the parts themselves contain `_`.
pub fn destination_name(source_id: &str, database: &str, schema: &str, table: &str) -> String {
    [source_id, database, schema, table]
        .iter()
        .map(|part| format!("{}_{part}", part.len()))
        .collect::<Vec<_>>()
        .join("_")
}

/// A source table to replicate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    /// Identifier of the source system the table lives in.
    pub source_id: String,
    pub database: String,
    pub schema: String,
    pub name: String,
    /// Ordered primary key column names.
    pub primary_key: Vec<String>,
    /// Column whose values order changes when polling.
    #[serde(default)]
    pub cursor_column: Option<String>,
    #[serde(default)]
    pub mode: SourceMode,
    /// Boolean column marking rows as deleted at the source.
    #[serde(default)]
    pub soft_delete_column: Option<String>,
    /// Overrides the pipeline-wide flush policy for this table.
    #[serde(default)]
    pub batch: Option<BatchConfig>,
}

impl TableConfig {
    /// Returns `source_id.database.schema.name`.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.source_id, self.database, self.schema, self.name
        )
    }

    /// Returns the name of the warehouse tables this table is replicated into.
    pub fn destination_name(&self) -> String {
        destination_name(&self.source_id, &self.database, &self.schema, &self.name)
    }

    /// Validates settings local to this table.
    ///
    /// Errors here only disable the offending table, so callers surface them per table.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.primary_key.is_empty() {
            return Err(ValidationError::EmptyPrimaryKey(self.qualified_name()));
        }

        let mut seen = HashSet::new();
        for column in &self.primary_key {
            if !seen.insert(column.as_str()) {
                return Err(ValidationError::DuplicatePrimaryKeyColumn {
                    table: self.qualified_name(),
                    column: column.clone(),
                });
            }
        }

        if let Some(batch) = &self.batch {
            batch.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(primary_key: &[&str]) -> TableConfig {
        TableConfig {
            source_id: "crm".to_string(),
            database: "app".to_string(),
            schema: "public".to_string(),
            name: "accounts".to_string(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            cursor_column: Some("updated_at".to_string()),
            mode: SourceMode::Polling,
            soft_delete_column: None,
            batch: None,
        }
    }

    #[test]
    fn requires_a_primary_key() {
        assert_eq!(
            table(&[]).validate(),
            Err(ValidationError::EmptyPrimaryKey(
                "crm.app.public.accounts".to_string()
            ))
        );
        assert!(table(&["id"]).validate().is_ok());
    }

    #[test]
    fn rejects_repeated_primary_key_columns() {
        assert!(matches!(
            table(&["tenant_id", "id", "tenant_id"]).validate(),
            Err(ValidationError::DuplicatePrimaryKeyColumn { column, .. }) if column == "tenant_id"
        ));
    }

    #[test]
    fn destination_names_keep_parts_apart() {
        let mut user_events = table(&["id"]);
        user_events.name = "user_events".to_string();
        let mut events = table(&["id"]);
        events.schema = "public_user".to_string();
        events.name = "events".to_string();

        assert_eq!(user_events.destination_name(), "3_crm_3_app_6_public_11_user_events");
        assert_eq!(events.destination_name(), "3_crm_3_app_11_public_user_6_events");
    }

    #[test]
    fn mode_defaults_to_polling() {
        let table: TableConfig = serde_json::from_str(
            r#"{"source_id":"crm","database":"app","schema":"public","name":"accounts","primary_key":["id"]}"#,
        )
        .unwrap();

        assert_eq!(table.mode, SourceMode::Polling);
        assert_eq!(table.cursor_column, None);
    }
}
