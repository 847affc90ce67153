//! Authoritative job database access.
//!
//! All queries are parameterized and go through a shared connection
//! pool; the matcher and the ingest pipeline check connections out
//! independently.

mod jobs;

pub use jobs::DueJob;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use crate::config::AppConfig;

/// Handle to the authoritative job database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: MySqlPool,
}

impl Database {
    /// Connect to the job database described by the configuration.
    ///
    /// A non-empty `mysql_sock` selects the Unix socket transport.
    ///
    /// # Errors
    ///
    /// Returns the underlying driver error when the pool cannot be
    /// established.
    pub async fn connect(config: &AppConfig) -> Result<Self, sqlx::Error> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.mysql_host)
            .username(&config.mysql_user)
            .password(&config.mysql_pass)
            .database(&config.mysql_db);

        if !config.mysql_sock.is_empty() {
            options = options.socket(&config.mysql_sock);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }
}
