use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type JobArguments = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Fast,
    Queued,
}

/// One tool invocation's worth of remote work.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub endpoint: String,
    pub arguments: JobArguments,
    pub mode: JobMode,
}

impl JobRequest {
    pub fn fast(endpoint: impl Into<String>, arguments: JobArguments) -> Self {
        Self {
            endpoint: endpoint.into(),
            arguments,
            mode: JobMode::Fast,
        }
    }

    pub fn queued(endpoint: impl Into<String>, arguments: JobArguments) -> Self {
        Self {
            endpoint: endpoint.into(),
            arguments,
            mode: JobMode::Queued,
        }
    }
}

/// Reference to a job accepted by the provider's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub request_id: String,
    pub endpoint: String,
    pub status_url: String,
    pub response_url: String,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Normalized response of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    /// Status text exactly as the provider reported it.
    pub label: String,
    pub logs: Vec<String>,
    pub queue_position: Option<u64>,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            label: status.as_str().to_string(),
            logs: Vec::new(),
            queue_position: None,
            error: None,
        }
    }

    pub fn with_logs<I, S>(mut self, logs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs = logs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPayload {
    pub media: Vec<MediaRef>,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AuthenticationMissing,
    InvalidArgument,
    RateLimited,
    TransientNetwork,
    ProviderError,
    ProviderJobFailed,
    ResultUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AuthenticationMissing => "authentication missing",
            Self::InvalidArgument => "invalid argument",
            Self::RateLimited => "rate limited",
            Self::TransientNetwork => "network error",
            Self::ProviderError => "provider error",
            Self::ProviderJobFailed => "job failed",
            Self::ResultUnavailable => "result unavailable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub logs: Vec<String>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            logs: Vec::new(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidArgument, message)
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }
}

/// The single result of executing a [`JobRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(JobPayload),
    Failure(JobFailure),
    TimedOut { elapsed: Duration },
}

impl JobOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(JobFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure(failure) => Some(failure.kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl ProgressEvent {
    pub fn from_report(handle: &JobHandle, report: &StatusReport) -> Self {
        Self {
            job_id: handle.request_id.clone(),
            endpoint: handle.endpoint.clone(),
            timestamp: Utc::now(),
            status: report.label.clone(),
            queue_position: report.queue_position,
            logs: report.logs.clone(),
        }
    }
}
