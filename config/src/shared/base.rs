use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A field holds a value outside its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    #[error("At least one table must be configured")]
    NoTables,
    #[error("Table `{0}` is configured more than once")]
    DuplicateTable(String),
    #[error("Destination table `{0}` is shared by more than one configured table")]
    DuplicateDestination(String),
    #[error("Table `{0}` must declare at least one primary key column")]
    EmptyPrimaryKey(String),
    #[error("Table `{table}` declares primary key column `{column}` more than once")]
    DuplicatePrimaryKeyColumn { table: String, column: String },
}

impl ValidationError {
    pub(crate) fn invalid_field(field: &str, constraint: &str) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            constraint: constraint.to_string(),
        }
    }
}
