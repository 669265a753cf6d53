use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

fn is_sqlite(dsn: &str) -> bool {
    dsn.starts_with("sqlite:")
}

/// Pool settings per backend. Sqlite gets a single connection so the
/// background writers never race each other for the file lock.
pub fn connect_options(dsn: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(dsn.to_string());
    options
        .connect_timeout(CONNECT_TIMEOUT)
        .acquire_timeout(CONNECT_TIMEOUT)
        .sqlx_logging(false);
    if is_sqlite(dsn) {
        options.max_connections(1).min_connections(1);
    } else {
        options.max_connections(16);
    }
    options
}

pub async fn connect(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(connect_options(dsn)).await
}
