//! Concurrent execution of one tick's worth of HTTP requests.
//!
//! A pool is created per tick, filled by the matcher, and run to
//! completion before the next tick can fire. Every request produces a
//! result, and every result is handed to the ingest queue before
//! [`WorkerPool::run`] returns.

use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ingest::ResultQueue;
use crate::request::HttpRequest;
use crate::result::{JobResult, JobStatus};
use crate::util;

/// Stored response headers and body are truncated to this many bytes.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Civil UTC fields of the batch's planned minute, for logging.
#[derive(Debug, Clone, Copy)]
pub struct BatchLabel {
    pub year: i32,
    pub month: u32,
    pub mday: u32,
    pub hour: u32,
    pub minute: u32,
}

impl std::fmt::Display for BatchLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}",
            self.year, self.month, self.mday, self.hour, self.minute
        )
    }
}

/// A batch of request descriptors executed concurrently.
pub struct WorkerPool {
    label: BatchLabel,
    client: reqwest::Client,
    queue: ResultQueue,
    requests: Vec<HttpRequest>,
}

impl WorkerPool {
    /// Create an empty pool for one tick.
    #[must_use]
    pub fn new(label: BatchLabel, client: reqwest::Client, queue: ResultQueue) -> Self {
        Self {
            label,
            client,
            queue,
            requests: Vec::new(),
        }
    }

    /// Queue a request descriptor for execution.
    pub fn add_job(&mut self, request: HttpRequest) {
        self.requests.push(request);
    }

    /// Whether any requests were queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Execute every queued request concurrently.
    ///
    /// Returns only after each request has produced a result and that
    /// result has been enqueued for ingest. Enqueue order across
    /// requests is unspecified.
    pub async fn run(self) {
        info!(batch = %self.label, jobs = self.requests.len(), "dispatching batch");

        let mut tasks = JoinSet::new();
        for request in self.requests {
            let client = self.client.clone();
            let queue = self.queue.clone();
            tasks.spawn(async move {
                let result = execute_request(&client, request).await;
                debug!(
                    job_id = result.job_id,
                    status = result.status.code(),
                    http_status = result.http_status,
                    duration_ms = result.duration,
                    "job finished"
                );
                queue.add_result(result);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "worker task panicked");
            }
        }

        debug!(batch = %self.label, "batch complete");
    }
}

/// Issue one request and complete its result slot.
async fn execute_request(client: &reqwest::Client, request: HttpRequest) -> JobResult {
    let HttpRequest {
        url,
        method,
        auth,
        headers,
        body,
        mut result,
    } = request;

    result.date_started = util::timestamp_ms();
    result.jitter =
        i64::try_from(result.date_started).unwrap_or(0) - i64::try_from(result.date_planned).unwrap_or(0);
    let started = Instant::now();

    let mut builder = client.request(method.as_method(), &url);
    if let Some(auth) = &auth {
        builder = builder.basic_auth(&auth.username, Some(&auth.password));
    }
    for (key, value) in &headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    if let Some(body) = body {
        builder = builder.body(body);
    }

    match builder.send().await {
        Ok(response) => {
            let status = response.status();
            result.http_status = status.as_u16();
            if result.save_responses {
                result.response_headers = truncate_capture(flatten_headers(response.headers()));
            }

            // Always read the transfer to completion; a failure mid-body
            // is a transport failure even though headers arrived.
            let body_read = if result.save_responses {
                response.text().await.map(Some)
            } else {
                response.bytes().await.map(|_| None)
            };

            match body_read {
                Ok(text) => {
                    if let Some(text) = text {
                        result.response_body = truncate_capture(text);
                    }
                    // A completed fetch is OK even when the server
                    // answered with an error code; `http_status` carries
                    // the code and failure semantics stay transport-only.
                    result.status = JobStatus::Ok;
                    result.status_text = "OK".to_string();
                }
                Err(error) => record_transport_error(&mut result, &error),
            }
        }
        Err(error) => record_transport_error(&mut result, &error),
    }

    result.duration = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    result
}

fn record_transport_error(result: &mut JobResult, error: &reqwest::Error) {
    if error.is_timeout() {
        result.status = JobStatus::FailedTimeout;
        result.status_text = "Timeout".to_string();
    } else {
        result.status = JobStatus::FailedOther;
        result.status_text = error.to_string();
    }
}

fn flatten_headers(headers: &reqwest::header::HeaderMap) -> String {
    let mut text = String::new();
    for (name, value) in headers {
        text.push_str(name.as_str());
        text.push_str(": ");
        text.push_str(&String::from_utf8_lossy(value.as_bytes()));
        text.push('\n');
    }
    text
}

fn truncate_capture(mut text: String) -> String {
    if text.len() > MAX_CAPTURE_BYTES {
        let mut end = MAX_CAPTURE_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DueJob;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn label() -> BatchLabel {
        BatchLabel {
            year: 2020,
            month: 1,
            mday: 6,
            hour: 10,
            minute: 5,
        }
    }

    fn due_job(url: String, save_responses: bool) -> DueJob {
        DueJob {
            url,
            jobid: 1,
            auth_enable: false,
            auth_user: String::new(),
            auth_pass: String::new(),
            notify_failure: false,
            notify_success: false,
            notify_disable: false,
            fail_counter: 0,
            save_responses,
            userid: 1,
            request_method: 0,
            header_count: 0,
            body: None,
        }
    }

    /// Minimal one-shot HTTP server answering every connection with 200.
    async fn spawn_server(responses: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0_u8; 4096];
                let _ = socket.read(&mut buf).await;
                socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\npong",
                    )
                    .await
                    .unwrap();
            }
        });
        format!("http://{addr}/")
    }

    #[test]
    fn test_truncate_capture_respects_char_boundaries() {
        let text = "é".repeat(MAX_CAPTURE_BYTES);
        let truncated = truncate_capture(text);
        assert!(truncated.len() <= MAX_CAPTURE_BYTES);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[test]
    fn test_truncate_capture_keeps_short_text() {
        assert_eq!(truncate_capture("pong".to_string()), "pong");
    }

    #[test]
    fn test_batch_label_format() {
        assert_eq!(label().to_string(), "2020-01-06 10:05");
    }

    #[tokio::test]
    async fn test_run_enqueues_every_result() {
        let url = spawn_server(2).await;
        let queue = ResultQueue::new();
        let client = reqwest::Client::new();

        let mut pool = WorkerPool::new(label(), client, queue.clone());
        pool.add_job(HttpRequest::from_due_job(
            due_job(url.clone(), true),
            Vec::new(),
            1_578_304_500,
        ));
        pool.add_job(HttpRequest::from_due_job(
            due_job(url, false),
            Vec::new(),
            1_578_304_500,
        ));
        assert!(!pool.is_empty());
        pool.run().await;

        let mut results: Vec<_> = queue.swap_pending().into_iter().collect();
        assert_eq!(results.len(), 2);
        results.sort_by_key(|r| r.response_body.is_empty());

        for result in &results {
            assert_eq!(result.status, JobStatus::Ok);
            assert_eq!(result.http_status, 200);
            assert!(result.date_started > 0);
            assert_eq!(
                result.jitter,
                i64::try_from(result.date_started).unwrap() - 1_578_304_500_000
            );
        }
        // Capture gating: only the save_responses job keeps its payload.
        assert_eq!(results[0].response_body, "pong");
        assert!(results[0].response_headers.contains("content-length: 4"));
        assert!(results[1].response_body.is_empty());
        assert!(results[1].response_headers.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_recorded_not_raised() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let queue = ResultQueue::new();
        let mut pool = WorkerPool::new(label(), reqwest::Client::new(), queue.clone());
        pool.add_job(HttpRequest::from_due_job(
            due_job(format!("http://{addr}/"), false),
            Vec::new(),
            0,
        ));
        pool.run().await;

        let results = queue.swap_pending();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, JobStatus::FailedOther);
        assert!(!results[0].status_text.is_empty());
        assert_eq!(results[0].http_status, 0);
    }

    #[tokio::test]
    async fn test_http_error_response_is_a_completed_fetch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0_u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let queue = ResultQueue::new();
        let mut pool = WorkerPool::new(label(), reqwest::Client::new(), queue.clone());
        pool.add_job(HttpRequest::from_due_job(
            due_job(format!("http://{addr}/"), false),
            Vec::new(),
            0,
        ));
        pool.run().await;

        // The round trip succeeded; the server's code is carried in
        // http_status and does not make the execution a failure.
        let results = queue.swap_pending();
        assert_eq!(results[0].status, JobStatus::Ok);
        assert_eq!(results[0].http_status, 404);
        assert_eq!(results[0].status_text, "OK");
    }
}
