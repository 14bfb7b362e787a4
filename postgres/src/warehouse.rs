//! SQL for Postgres used as the destination warehouse.
//!
//! Target tables keep the source row as `jsonb` next to `_etl_*` bookkeeping columns.
//! Rows are never physically deleted, a delete only sets `_etl_deleted`.

use pg_escape::quote_identifier;

use crate::schema::TableName;

pub fn create_schema_sql(schema: &str) -> String {
    format!("create schema if not exists {}", quote_identifier(schema))
}

pub fn create_target_table_sql(target: &TableName) -> String {
    format!(
        r#"
        create table if not exists {} (
            _etl_primary_key text primary key,
            _etl_payload jsonb not null,
            _etl_token_position bigint not null,
            _etl_deleted boolean not null default false,
            _etl_ingested_at timestamptz not null,
            _etl_merged_at timestamptz not null
        )
        "#,
        target.as_quoted_identifier()
    )
}

pub fn create_staging_table_sql(staging: &TableName) -> String {
    format!(
        r#"
        create table if not exists {} (
            _etl_primary_key text not null,
            _etl_operation text not null,
            _etl_token_position bigint not null,
            _etl_payload jsonb not null,
            _etl_ingested_at timestamptz not null,
            _etl_batch_id uuid not null
        )
        "#,
        staging.as_quoted_identifier()
    )
}

/// Inserts staged rows from six parallel array binds.
///
/// Binds: primary keys, operations, token positions, payloads as JSON text, ingestion
/// timestamps, batch ids as text.
pub fn insert_staging_rows_sql(staging: &TableName) -> String {
    format!(
        r#"
        insert into {} (
            _etl_primary_key, _etl_operation, _etl_token_position,
            _etl_payload, _etl_ingested_at, _etl_batch_id
        )
        select primary_key, operation, token_position, payload::jsonb, ingested_at, batch_id::uuid
        from unnest($1::text[], $2::text[], $3::bigint[], $4::text[], $5::timestamptz[], $6::text[])
            as rows (primary_key, operation, token_position, payload, ingested_at, batch_id)
        "#,
        staging.as_quoted_identifier()
    )
}

/// Applies the newest staged upsert of each key unless the target already holds a newer or equal
/// token.
pub fn merge_upserts_sql(target: &TableName, staging: &TableName) -> String {
    format!(
        r#"
        insert into {target} as target (
            _etl_primary_key, _etl_payload, _etl_token_position,
            _etl_deleted, _etl_ingested_at, _etl_merged_at
        )
        select distinct on (_etl_primary_key)
            _etl_primary_key, _etl_payload, _etl_token_position, false, _etl_ingested_at, now()
        from {staging}
        where _etl_operation = 'upsert'
        order by _etl_primary_key, _etl_token_position desc
        on conflict (_etl_primary_key) do update set
            _etl_payload = excluded._etl_payload,
            _etl_token_position = excluded._etl_token_position,
            _etl_deleted = false,
            _etl_ingested_at = excluded._etl_ingested_at,
            _etl_merged_at = excluded._etl_merged_at
        where target._etl_token_position < excluded._etl_token_position
        "#,
        target = target.as_quoted_identifier(),
        staging = staging.as_quoted_identifier(),
    )
}

/// Marks rows deleted by the newest staged delete of each key.
///
/// A delete carrying the same token as the current row wins over it, an older one is ignored.
pub fn merge_deletes_sql(target: &TableName, staging: &TableName) -> String {
    format!(
        r#"
        update {target} as target set
            _etl_deleted = true,
            _etl_token_position = deletes._etl_token_position,
            _etl_ingested_at = deletes._etl_ingested_at,
            _etl_merged_at = now()
        from (
            select distinct on (_etl_primary_key)
                _etl_primary_key, _etl_token_position, _etl_ingested_at
            from {staging}
            where _etl_operation = 'delete'
            order by _etl_primary_key, _etl_token_position desc
        ) as deletes
        where target._etl_primary_key = deletes._etl_primary_key
            and (
                target._etl_token_position < deletes._etl_token_position
                or (
                    target._etl_token_position = deletes._etl_token_position
                    and not target._etl_deleted
                )
            )
        "#,
        target = target.as_quoted_identifier(),
        staging = staging.as_quoted_identifier(),
    )
}

pub fn clear_staging_sql(staging: &TableName) -> String {
    format!("delete from {}", staging.as_quoted_identifier())
}
