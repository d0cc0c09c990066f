use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Opens a connection pool sized per the concurrency model: min 5, max 20.
pub async fn connect(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(dsn.to_owned());
    opts.min_connections(5)
        .max_connections(20)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10));
    Database::connect(opts).await
}

/// Polls `SELECT 1 FROM credential_model_status LIMIT 1` until it succeeds
/// or `timeout` elapses, retrying while the schema has not been created
/// yet (a fresh database briefly reports the table as missing while
/// `sync()` is still running concurrently on another instance).
pub async fn wait_for_schema_ready(conn: &DatabaseConnection, timeout: Duration) -> Result<(), DbErr> {
    use sea_orm::{ConnectionTrait, Statement};

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let probe = conn
            .execute(Statement::from_string(
                conn.get_database_backend(),
                "SELECT 1 FROM credential_model_status LIMIT 1",
            ))
            .await;

        match probe {
            Ok(_) => return Ok(()),
            Err(err) if tokio::time::Instant::now() < deadline => {
                tracing::debug!(error = %err, "schema not ready yet, retrying");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
