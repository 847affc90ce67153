//! HTTP request descriptors built by the matcher and executed by the
//! worker pool.

use crate::db::DueJob;
use crate::result::{JobResult, JobStatus};

/// HTTP method of a job, encoded as a small integer in the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Options,
    Head,
    Put,
    Delete,
    Trace,
    Connect,
    Patch,
}

impl RequestMethod {
    /// Parse a persisted method code; unrecognized codes fall back to GET.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Post,
            2 => Self::Options,
            3 => Self::Head,
            4 => Self::Put,
            5 => Self::Delete,
            6 => Self::Trace,
            7 => Self::Connect,
            8 => Self::Patch,
            _ => Self::Get,
        }
    }

    /// Stable integer code for persistence.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Get => 0,
            Self::Post => 1,
            Self::Options => 2,
            Self::Head => 3,
            Self::Put => 4,
            Self::Delete => 5,
            Self::Trace => 6,
            Self::Connect => 7,
            Self::Patch => 8,
        }
    }

    pub(crate) fn as_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Options => reqwest::Method::OPTIONS,
            Self::Head => reqwest::Method::HEAD,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Trace => reqwest::Method::TRACE,
            Self::Connect => reqwest::Method::CONNECT,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

/// HTTP basic-auth credentials attached to a job.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// One unit of work for the worker pool.
///
/// Carries everything needed to issue the request plus a pre-filled
/// [`JobResult`] slot that the worker completes with timing and outcome.
#[derive(Debug)]
pub struct HttpRequest {
    pub url: String,
    pub method: RequestMethod,
    pub auth: Option<BasicAuth>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub result: JobResult,
}

impl HttpRequest {
    /// Build a request descriptor from a matched job row.
    ///
    /// `planned_time` is the tick's minute boundary in seconds; the
    /// result slot records it in milliseconds.
    #[must_use]
    pub fn from_due_job(job: DueJob, headers: Vec<(String, String)>, planned_time: i64) -> Self {
        let result = JobResult {
            job_id: job.jobid,
            user_id: job.userid,
            url: job.url.clone(),
            date_planned: u64::try_from(planned_time).unwrap_or(0) * 1000,
            date_started: 0,
            duration: 0,
            jitter: 0,
            status: JobStatus::Unknown,
            status_text: String::new(),
            http_status: 0,
            response_headers: String::new(),
            response_body: String::new(),
            save_responses: job.save_responses,
            notify_failure: job.notify_failure,
            notify_success: job.notify_success,
            notify_disable: job.notify_disable,
            old_fail_counter: job.fail_counter,
        };

        Self {
            url: job.url,
            method: RequestMethod::from_code(job.request_method),
            auth: job.auth_enable.then(|| BasicAuth {
                username: job.auth_user,
                password: job.auth_pass,
            }),
            headers,
            body: job.body,
            result,
        }
    }
}
