//! SQLite pool construction. Every store crate shares one pool; foreign
//! keys are enabled per connection so cascades and restrict rules hold.

use {
    sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    std::str::FromStr,
    tracing::debug,
};

/// Open (creating if missing) the engine database at `db_path`.
/// Pass `:memory:` for an in-memory database in tests.
pub async fn connect(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await?;

    debug!(db_path, "opened engine database");
    Ok(pool)
}

/// In-memory pool for tests. A single connection keeps the database alive
/// and makes writes immediately visible to subsequent queries.
pub async fn connect_memory() -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
}
