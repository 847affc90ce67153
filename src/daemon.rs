//! Daemon assembly and lifecycle.
//!
//! One owning scope constructs every component at startup and tears
//! them down in order at shutdown: the tick loop stops first, the
//! result queue is asked to drain, and the ingest task is joined so no
//! accepted result is lost to an orderly exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use crate::config::AppConfig;
use crate::db::Database;
use crate::ingest::{IngestWorker, ResultQueue};
use crate::joblog::JobLogStore;
use crate::matcher::Dispatcher;
use crate::tick::TickLoop;

/// The assembled execution daemon.
pub struct Daemon {
    config: Arc<AppConfig>,
    db: Database,
}

impl Daemon {
    /// Connect to the job database and assemble the daemon.
    ///
    /// # Errors
    ///
    /// Fails when the database pool cannot be established; startup
    /// failures are fatal.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let db = Database::connect(&config)
            .await
            .context("connecting to the job database")?;
        info!(host = %config.mysql_host, db = %config.mysql_db, "job database connected");

        Ok(Self {
            config: Arc::new(config),
            db,
        })
    }

    /// Run until `shutdown` flips to true, then drain and exit.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let queue = ResultQueue::new();

        let log_store = JobLogStore::new(
            &self.config.user_db_file_path_scheme,
            &self.config.user_db_file_name_scheme,
        );
        let ingest = IngestWorker::new(
            queue.clone(),
            self.db.clone(),
            log_store,
            self.config.max_failures,
        );
        let ingest_handle = tokio::spawn(ingest.run());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .user_agent(concat!("chronod/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building the HTTP client")?;
        let dispatcher = Dispatcher::new(self.db.clone(), client, queue.clone());

        TickLoop::new(dispatcher).run(shutdown).await;

        info!("draining result queue");
        queue.shutdown();
        ingest_handle.await.context("joining the ingest task")?;

        Ok(())
    }
}
