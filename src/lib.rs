//! chronod - execution daemon for a hosted cron service.
//!
//! Every wall-clock minute the daemon determines which user-defined
//! HTTP jobs are due, dispatches their requests concurrently, and
//! persists the outcomes with follow-up state transitions (failure
//! counters, auto-disable, notifications).
//!
//! # Architecture
//!
//! - [`tick`]: minute-edge timer with jitter correction
//! - [`matcher`]: per-timezone civil-time schedule matching
//! - [`worker`]: concurrent HTTP execution of one tick's batch
//! - [`ingest`]: background persistence of results and job state
//! - [`db`]: authoritative job database (users, jobs, schedules,
//!   notifications)
//! - [`joblog`]: per-user, per-day SQLite result logs
//!
//! Data flows one way: tick loop -> matcher -> worker pool -> result
//! queue -> ingest. Nothing calls back into the tick loop.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod ingest;
pub mod joblog;
pub mod matcher;
pub mod request;
pub mod result;
pub mod tick;
pub mod util;
pub mod worker;

pub use config::AppConfig;
pub use daemon::Daemon;
