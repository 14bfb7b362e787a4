//! Keyset pagination over a source table.
//!
//! Pages are ordered by the composite key `(cursor position, primary key...)` and each
//! page resumes strictly after the last key of the previous one, so rows sharing a cursor
//! value are never dropped or duplicated at a page boundary.

use sqlx::{PgPool, prelude::FromRow};

use crate::schema::{TableName, quote_column};

pub const POSITION_COLUMN: &str = "_etl_position";
pub const SOURCE_TIMESTAMP_COLUMN: &str = "_etl_source_timestamp";
pub const PAYLOAD_COLUMN: &str = "_etl_payload";
pub const DELETED_COLUMN: &str = "_etl_deleted";

/// Returns the alias under which the primary key column at `index` is selected.
pub fn key_column_alias(index: usize) -> String {
    format!("_etl_key_{index}")
}

#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Lists the columns of `table` in ordinal order.
pub async fn fetch_table_columns(
    pool: &PgPool,
    table: &TableName,
) -> sqlx::Result<Vec<ColumnInfo>> {
    sqlx::query_as::<_, ColumnInfo>(
        r#"
        select column_name::text as name, data_type::text as data_type
        from information_schema.columns
        where table_schema = $1 and table_name = $2
        order by ordinal_position
        "#,
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_all(pool)
    .await
}

/// How a primary key column is compared and decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumnKind {
    /// Compared and decoded as `bigint`.
    Integer,
    /// Compared as `text` under the `C` collation, which orders by bytes.
    Text,
}

impl KeyColumnKind {
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type {
            "smallint" | "integer" | "bigint" => KeyColumnKind::Integer,
            _ => KeyColumnKind::Text,
        }
    }
}

/// How the cursor column maps onto an `i64` ordering position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Microseconds since the Unix epoch.
    Timestamp,
    Integer,
}

impl CursorKind {
    /// Returns `None` for types that cannot order changes.
    pub fn from_data_type(data_type: &str) -> Option<Self> {
        match data_type {
            "timestamp with time zone" | "timestamp without time zone" | "date" => {
                Some(CursorKind::Timestamp)
            }
            "smallint" | "integer" | "bigint" => Some(CursorKind::Integer),
            _ => None,
        }
    }
}

/// Builds the paging query for one source table.
#[derive(Debug, Clone)]
pub struct PollingQuery {
    pub table: TableName,
    pub cursor_column: String,
    pub cursor_kind: CursorKind,
    pub key_columns: Vec<(String, KeyColumnKind)>,
    pub soft_delete_column: Option<String>,
}

impl PollingQuery {
    fn position_expression(&self) -> String {
        let cursor = format!("t.{}", quote_column(&self.cursor_column));
        match self.cursor_kind {
            CursorKind::Timestamp => {
                format!("coalesce((extract(epoch from {cursor}) * 1000000)::bigint, 0)")
            }
            CursorKind::Integer => format!("coalesce({cursor}::bigint, 0)"),
        }
    }

    fn source_timestamp_expression(&self) -> String {
        match self.cursor_kind {
            CursorKind::Timestamp => format!(
                "coalesce(t.{}::timestamptz, statement_timestamp())",
                quote_column(&self.cursor_column)
            ),
            CursorKind::Integer => "statement_timestamp()".to_string(),
        }
    }

    fn key_expressions(&self) -> Vec<String> {
        self.key_columns
            .iter()
            .map(|(column, kind)| match kind {
                KeyColumnKind::Integer => format!("t.{}::bigint", quote_column(column)),
                KeyColumnKind::Text => format!("t.{}::text collate \"C\"", quote_column(column)),
            })
            .collect()
    }

    /// Renders the query.
    ///
    /// With `resume` the first bind is the last seen position followed by one bind per
    /// key column; the page size is always the last bind.
    pub fn build(&self, resume: bool) -> String {
        let position = self.position_expression();
        let keys = self.key_expressions();

        let mut select = vec![
            format!("{position} as {POSITION_COLUMN}"),
            format!("{} as {SOURCE_TIMESTAMP_COLUMN}", self.source_timestamp_expression()),
        ];
        for (index, key) in keys.iter().enumerate() {
            select.push(format!("{key} as {}", key_column_alias(index)));
        }
        select.push(format!("row_to_json(t)::text as {PAYLOAD_COLUMN}"));
        select.push(match &self.soft_delete_column {
            Some(column) => format!(
                "coalesce(t.{}::boolean, false) as {DELETED_COLUMN}",
                quote_column(column)
            ),
            None => format!("false as {DELETED_COLUMN}"),
        });

        let mut order = vec![position.clone()];
        order.extend(keys.iter().cloned());
        let order = order.join(", ");

        let mut query = format!(
            "select {} from {} as t",
            select.join(", "),
            self.table.as_quoted_identifier()
        );

        let limit_param = if resume {
            let mut params = vec!["$1::bigint".to_string()];
            for (index, (_, kind)) in self.key_columns.iter().enumerate() {
                let param = index + 2;
                params.push(match kind {
                    KeyColumnKind::Integer => format!("${param}::bigint"),
                    KeyColumnKind::Text => format!("${param}::text collate \"C\""),
                });
            }
            query.push_str(&format!(" where ({order}) > ({})", params.join(", ")));
            self.key_columns.len() + 2
        } else {
            1
        };

        query.push_str(&format!(" order by {order} limit ${limit_param}"));
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(soft_delete_column: Option<&str>) -> PollingQuery {
        PollingQuery {
            table: TableName::new("public", "orders"),
            cursor_column: "updated_at".to_string(),
            cursor_kind: CursorKind::Timestamp,
            key_columns: vec![
                ("tenant_id".to_string(), KeyColumnKind::Integer),
                ("code".to_string(), KeyColumnKind::Text),
            ],
            soft_delete_column: soft_delete_column.map(str::to_string),
        }
    }

    #[test]
    fn first_page_has_no_predicate() {
        let sql = query(None).build(false);

        assert!(!sql.contains(" where "));
        assert!(sql.ends_with(
            "order by coalesce((extract(epoch from t.updated_at) * 1000000)::bigint, 0), \
             t.tenant_id::bigint, t.code::text collate \"C\" limit $1"
        ));
        assert!(sql.contains("false as _etl_deleted"));
    }

    #[test]
    fn resumed_page_compares_the_full_composite_key() {
        let sql = query(Some("is_deleted")).build(true);

        assert!(sql.contains(
            "where (coalesce((extract(epoch from t.updated_at) * 1000000)::bigint, 0), \
             t.tenant_id::bigint, t.code::text collate \"C\") \
             > ($1::bigint, $2::bigint, $3::text collate \"C\")"
        ));
        assert!(sql.ends_with("limit $4"));
        assert!(sql.contains("coalesce(t.is_deleted::boolean, false) as _etl_deleted"));
    }

    #[test]
    fn classifies_column_types() {
        assert_eq!(KeyColumnKind::from_data_type("bigint"), KeyColumnKind::Integer);
        assert_eq!(KeyColumnKind::from_data_type("uuid"), KeyColumnKind::Text);
        assert_eq!(
            CursorKind::from_data_type("timestamp with time zone"),
            Some(CursorKind::Timestamp)
        );
        assert_eq!(CursorKind::from_data_type("text"), None);
    }
}
