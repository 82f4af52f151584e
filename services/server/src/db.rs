use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Schema definition and migrations are managed outside this service; the
/// pool only consumes existing tables.
pub async fn create_pool(database_url: &str) -> PgPool {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .expect("failed to connect to Postgres")
}
