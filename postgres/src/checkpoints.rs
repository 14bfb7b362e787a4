use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, prelude::FromRow};

/// A row of `etl.checkpoints`.
#[derive(Debug, FromRow)]
pub struct CheckpointRow {
    pub pipeline_id: i64,
    pub table_id: String,
    pub checkpoint: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

pub async fn get_checkpoint_row(
    pool: &PgPool,
    pipeline_id: i64,
    table_id: &str,
) -> sqlx::Result<Option<CheckpointRow>> {
    sqlx::query_as::<_, CheckpointRow>(
        r#"
        select pipeline_id, table_id, checkpoint, updated_at
        from etl.checkpoints
        where pipeline_id = $1 and table_id = $2
        "#,
    )
    .bind(pipeline_id)
    .bind(table_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_checkpoint_table_ids(
    pool: &PgPool,
    pipeline_id: i64,
) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        r#"
        select table_id from etl.checkpoints
        where pipeline_id = $1
        order by table_id
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await
}

/// Reads the stored checkpoint and locks its row until the surrounding transaction ends.
pub async fn lock_checkpoint_row(
    conn: &mut PgConnection,
    pipeline_id: i64,
    table_id: &str,
) -> sqlx::Result<Option<serde_json::Value>> {
    sqlx::query_scalar(
        r#"
        select checkpoint from etl.checkpoints
        where pipeline_id = $1 and table_id = $2
        for update
        "#,
    )
    .bind(pipeline_id)
    .bind(table_id)
    .fetch_optional(conn)
    .await
}

pub async fn upsert_checkpoint_row(
    conn: &mut PgConnection,
    pipeline_id: i64,
    table_id: &str,
    checkpoint: serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into etl.checkpoints (pipeline_id, table_id, checkpoint, updated_at)
        values ($1, $2, $3, now())
        on conflict (pipeline_id, table_id)
        do update set checkpoint = excluded.checkpoint, updated_at = excluded.updated_at
        "#,
    )
    .bind(pipeline_id)
    .bind(table_id)
    .bind(checkpoint)
    .execute(conn)
    .await?;

    Ok(())
}
