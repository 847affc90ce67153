//! Background ingest of job results.
//!
//! Worker tasks append results to a shared FIFO queue; a single
//! long-lived consumer drains it, writes each result to the owning
//! user's log store, updates the job's execution metadata, and emits
//! notification rows on state transitions.
//!
//! The consumer swaps the whole queue out under the lock, so producers
//! are never blocked behind store I/O and arrival order is preserved.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::db::Database;
use crate::joblog::JobLogStore;
use crate::result::{JobResult, JobStatus, NotificationType};

/// Shared FIFO of completed results awaiting persistence.
#[derive(Clone, Default)]
pub struct ResultQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    results: Mutex<VecDeque<JobResult>>,
    signal: Notify,
    stop: AtomicBool,
}

impl ResultQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result and wake the consumer.
    pub fn add_result(&self, result: JobResult) {
        self.inner.results.lock().push_back(result);
        self.inner.signal.notify_one();
    }

    /// Ask the consumer to exit once the queue is drained.
    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.signal.notify_one();
    }

    /// Take everything currently queued, in arrival order.
    pub(crate) fn swap_pending(&self) -> VecDeque<JobResult> {
        std::mem::take(&mut *self.inner.results.lock())
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        self.inner.signal.notified().await;
    }
}

/// What `store_result` decided to do after re-reading the fail counter.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PolicyDecision {
    pub disable: bool,
    pub notification: Option<NotificationType>,
}

/// Evaluate the post-execution policy for one stored result.
///
/// `fail_counter` is the value re-read from the job database after the
/// metadata update. The predicates are ordered: disabling resets the
/// counter before the failure and recovery predicates see it, so a
/// disable is never reported as a plain failure, and at most one
/// notification is ever emitted.
pub(crate) fn evaluate_policy(
    result: &JobResult,
    fail_counter: i32,
    max_failures: i32,
) -> PolicyDecision {
    let mut decision = PolicyDecision {
        disable: false,
        notification: None,
    };
    let mut fail_counter = fail_counter;

    if fail_counter > max_failures {
        decision.disable = true;
        fail_counter = 0;
        if result.notify_disable {
            decision.notification = Some(NotificationType::Disable);
        }
    }

    if result.notify_failure && result.status != JobStatus::Ok && fail_counter == 1 {
        decision.notification = Some(NotificationType::Failure);
    }

    if result.notify_success
        && result.status == JobStatus::Ok
        && result.old_fail_counter > 0
        && fail_counter == 0
    {
        decision.notification = Some(NotificationType::Success);
    }

    decision
}

/// Single consumer persisting queued results.
pub struct IngestWorker {
    queue: ResultQueue,
    db: Database,
    log_store: JobLogStore,
    max_failures: i32,
}

impl IngestWorker {
    #[must_use]
    pub fn new(queue: ResultQueue, db: Database, log_store: JobLogStore, max_failures: i32) -> Self {
        Self {
            queue,
            db,
            log_store,
            max_failures,
        }
    }

    /// Drain the queue until shutdown.
    ///
    /// A failure to persist one result is logged and the result is
    /// dropped; the consumer itself never dies over data.
    pub async fn run(self) {
        debug!("ingest worker started");

        loop {
            let batch = self.queue.swap_pending();
            if batch.is_empty() {
                if self.queue.is_stopped() {
                    break;
                }
                self.queue.wait().await;
                continue;
            }

            let count = batch.len();
            let started = Instant::now();
            for result in batch {
                let job_id = result.job_id;
                if let Err(error) = self.store_result(result).await {
                    error!(job_id, %error, "failed to store job result");
                }
            }
            if count > 100 {
                info!(
                    results = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "drained large result batch"
                );
            }
        }

        debug!("ingest worker stopped");
    }

    /// Persist one result and apply follow-up state transitions.
    async fn store_result(&self, result: JobResult) -> anyhow::Result<()> {
        // Log-store write first; if the user's store is unusable the
        // result is dropped without touching job metadata.
        let joblog_id = match self.log_store.write(&result).await {
            Ok(id) => id,
            Err(error) => {
                error!(job_id = result.job_id, %error, "job log write failed, dropping result");
                return Ok(());
            }
        };

        let reset = matches!(result.status, JobStatus::Ok | JobStatus::FailedTimeout);
        self.db
            .update_job_execution(
                result.job_id,
                result.status.code(),
                i64::try_from(result.date_started / 1000).unwrap_or(0),
                i64::try_from(result.duration).unwrap_or(i64::MAX),
                reset,
            )
            .await?;

        // Re-read: the counter the policy sees is the committed one.
        let fail_counter = self.db.fail_counter(result.job_id).await?;
        let decision = evaluate_policy(&result, fail_counter, self.max_failures);

        if decision.disable {
            info!(
                job_id = result.job_id,
                fail_counter, "failure limit exceeded, disabling job"
            );
            self.db.disable_job(result.job_id).await?;
        }

        if let Some(kind) = decision.notification {
            self.db
                .insert_notification(
                    result.job_id,
                    joblog_id,
                    chrono::Utc::now().timestamp(),
                    kind,
                )
                .await?;
        }

        Ok(())
    }
}
