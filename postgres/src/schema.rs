use std::fmt;

use pg_escape::quote_identifier;

/// Longest identifier Postgres keeps. Longer ones are silently truncated.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// A schema qualified Postgres table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns `"schema"."name"` with both parts quoted as needed.
    pub fn as_quoted_identifier(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Quotes a single identifier for interpolation into SQL.
pub fn quote_column(column: &str) -> String {
    quote_identifier(column).into_owned()
}
