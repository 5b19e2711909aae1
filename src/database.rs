use std::time::Duration;

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};

use crate::config::{PostgresConfig, SslMode};

/// Every query the scanner issues is a single-row write or a small
/// aggregate; anything running longer than this is stuck.
const STATEMENT_TIMEOUT_MS: &str = "30000";

/// A stalled acquire would pin a scan worker slot for the whole cycle.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn create_postgres_pool(config: &PostgresConfig) -> Result<PgPool, sqlx::Error> {
    let mut options: PgConnectOptions = config.connection_string.parse()?;
    options = options
        .application_name(&config.application_name)
        .options([("statement_timeout", STATEMENT_TIMEOUT_MS)]);

    let ssl_mode = match config.ssl_mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
    };
    options = options.ssl_mode(ssl_mode);

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
}
