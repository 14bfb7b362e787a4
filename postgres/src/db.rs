use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{Executor, PgPool, postgres::PgPoolOptions};

/// Opens a lazily connecting pool sized by [`PgConnectionConfig::max_connections`].
///
/// No connection is attempted until the first query, so an unreachable server surfaces
/// as a retryable failure of that query.
pub fn connect_pool_lazy(config: &PgConnectionConfig, application_name: &str) -> PgPool {
    let options = IntoConnectOptions::<sqlx::postgres::PgConnectOptions>::with_db(config)
        .application_name(application_name);

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_lazy_with(options)
}

/// Creates the `etl` schema and applies the bundled migrations.
pub async fn migrate_etl_schema(config: &PgConnectionConfig) -> Result<(), sqlx::Error> {
    let options = IntoConnectOptions::<sqlx::postgres::PgConnectOptions>::with_db(config)
        .application_name("replicator_migrator");

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists etl;").await?;
                // Keeps `_sqlx_migrations` inside the etl schema.
                conn.execute("set search_path = 'etl';").await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    pool.close().await;

    Ok(())
}
