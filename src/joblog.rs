//! Per-user, per-day result log stores.
//!
//! Each user gets a directory derived from the hex-bucketed user id,
//! and each day gets its own SQLite file inside it. Stores are opened
//! on demand from the ingest pipeline only, configured for fast
//! non-durable writes, with idempotent schema setup on every open.
//!
//! All SQLite work runs on the blocking thread pool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike};
use rusqlite::{params, Connection};
use tokio::task;

use crate::result::JobResult;
use crate::util;

/// Derives store paths and writes result rows.
#[derive(Debug, Clone)]
pub struct JobLogStore {
    path_scheme: String,
    name_scheme: String,
}

impl JobLogStore {
    /// Create a store over the configured path and file-name schemes.
    ///
    /// `path_scheme` must contain `%u` (validated at startup);
    /// `name_scheme` normally contains `%m` and `%d`.
    #[must_use]
    pub fn new(path_scheme: impl Into<String>, name_scheme: impl Into<String>) -> Self {
        Self {
            path_scheme: path_scheme.into(),
            name_scheme: name_scheme.into(),
        }
    }

    /// Resolve the store file for a user and a planned instant (ms).
    ///
    /// `%u` becomes the hex-bucketed user id. `%m` and `%d` come from
    /// decomposing the planned instant in UTC, both zero-padded to two
    /// digits. The month is zero-based (January = `00`); existing
    /// on-disk layouts use that convention and changing it would split
    /// a month's logs across two file series.
    pub fn db_path_for(&self, user_id: i32, planned_ms: u64) -> Result<PathBuf> {
        let planned = DateTime::from_timestamp_millis(i64::try_from(planned_ms).unwrap_or(0))
            .context("planned timestamp out of range")?;

        let dir = self
            .path_scheme
            .replace("%u", &util::user_path_part(i64::from(user_id)));
        let name = self
            .name_scheme
            .replace("%m", &format!("{:02}", planned.month0()))
            .replace("%d", &format!("{:02}", planned.day()));

        Ok(PathBuf::from(dir).join(name))
    }

    /// Append one result row, returning the new `joblogid`.
    ///
    /// A companion `joblog_response` row is written only when the job
    /// requested response capture and there is something to capture.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory tree cannot be created or
    /// any SQLite operation fails; the caller drops the result in that
    /// case.
    pub async fn write(&self, result: &JobResult) -> Result<i64> {
        let db_path = self.db_path_for(result.user_id, result.date_planned)?;
        let result = result.clone();

        task::spawn_blocking(move || -> Result<i64> {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }

            let conn = Connection::open(&db_path)
                .with_context(|| format!("opening {}", db_path.display()))?;

            conn.pragma_update(None, "synchronous", "OFF")
                .context("disabling synchronous writes")?;

            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS "joblog" (
                    "joblogid" INTEGER PRIMARY KEY ASC,
                    "jobid" INTEGER NOT NULL,
                    "date" INTEGER NOT NULL,
                    "date_planned" INTEGER NOT NULL,
                    "jitter" INTEGER NOT NULL,
                    "url" TEXT NOT NULL,
                    "duration" INTEGER NOT NULL,
                    "status" INTEGER NOT NULL,
                    "status_text" TEXT NOT NULL,
                    "http_status" INTEGER NOT NULL,
                    "created" INTEGER NOT NULL
                )
                "#,
                [],
            )
            .context("creating joblog table")?;

            conn.execute(
                r#"CREATE INDEX IF NOT EXISTS "idx_joblog_jobid" ON "joblog" ("jobid")"#,
                [],
            )?;

            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS "joblog_response" (
                    "joblogid" INTEGER PRIMARY KEY,
                    "jobid" INTEGER NOT NULL,
                    "date" INTEGER NOT NULL,
                    "headers" TEXT NOT NULL,
                    "body" TEXT NOT NULL,
                    "created" INTEGER NOT NULL
                )
                "#,
                [],
            )
            .context("creating joblog_response table")?;

            let date_started = i64::try_from(result.date_started / 1000).unwrap_or(0);
            let date_planned = i64::try_from(result.date_planned / 1000).unwrap_or(0);
            let created = chrono::Utc::now().timestamp();

            conn.execute(
                r#"
                INSERT INTO "joblog"
                    ("jobid", "date", "date_planned", "jitter", "url",
                     "duration", "status", "status_text", "http_status", "created")
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    result.job_id,
                    date_started,
                    date_planned,
                    result.jitter,
                    result.url,
                    i64::try_from(result.duration).unwrap_or(i64::MAX),
                    result.status.code(),
                    result.status_text,
                    result.http_status,
                    created,
                ],
            )
            .context("inserting joblog row")?;

            let joblog_id = conn.last_insert_rowid();

            if result.save_responses
                && (!result.response_headers.is_empty() || !result.response_body.is_empty())
            {
                conn.execute(
                    r#"
                    INSERT INTO "joblog_response"
                        ("joblogid", "jobid", "date", "headers", "body", "created")
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        joblog_id,
                        result.job_id,
                        date_started,
                        result.response_headers,
                        result.response_body,
                        created,
                    ],
                )
                .context("inserting joblog_response row")?;
            }

            Ok(joblog_id)
        })
        .await
        .context("joining blocking store write")?
    }
}
