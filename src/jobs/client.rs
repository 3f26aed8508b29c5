use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::jobs::types::{FailureKind, JobArguments, JobFailure, JobHandle, StatusReport};

/// Errors raised by a [`RemoteJobClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider error{}: {message}", http_suffix(.status))]
    Provider { status: Option<u16>, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("result expired: {0}")]
    ResultExpired(String),

    #[error("{0} is not supported by this client")]
    Unsupported(&'static str),
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::AuthenticationMissing,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::InvalidArgument(_) | Self::Unsupported(_) => FailureKind::InvalidArgument,
            Self::Provider { .. } => FailureKind::ProviderError,
            Self::Network(_) => FailureKind::TransientNetwork,
            Self::ResultExpired(_) => FailureKind::ResultUnavailable,
        }
    }

    /// Whether a failed status poll may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Provider { status, .. } => status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<RemoteError> for JobFailure {
    fn from(err: RemoteError) -> Self {
        let retry_after = err.retry_after();
        let mut failure = JobFailure::new(err.kind(), err.to_string());
        failure.retry_after = retry_after;
        failure
    }
}

/// Capability surface of a generative-media provider.
///
/// Implementations must be safe to share between concurrently running jobs.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Runs a job synchronously and returns its raw result.
    async fn run(&self, endpoint: &str, arguments: &JobArguments) -> Result<Value, RemoteError>;

    /// Enqueues a job and returns immediately.
    async fn submit(
        &self,
        endpoint: &str,
        arguments: &JobArguments,
    ) -> Result<JobHandle, RemoteError>;

    async fn poll_status(&self, handle: &JobHandle) -> Result<StatusReport, RemoteError>;

    async fn fetch_result(&self, handle: &JobHandle) -> Result<Value, RemoteError>;

    /// Best-effort cancellation of a queued job.
    async fn cancel(&self, _handle: &JobHandle) -> Result<(), RemoteError> {
        Err(RemoteError::Unsupported("cancel"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_server_errors_are_transient() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(
            RemoteError::Provider {
                status: Some(503),
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !RemoteError::Provider {
                status: Some(409),
                message: "conflict".into()
            }
            .is_transient()
        );
        assert!(!RemoteError::Auth("no key".into()).is_transient());
        assert!(!RemoteError::InvalidArgument("bad".into()).is_transient());
    }

    #[test]
    fn rate_limit_keeps_retry_hint() {
        let failure: JobFailure = RemoteError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(7)),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert_eq!(failure.retry_after, Some(Duration::from_secs(7)));
        assert!(failure.message.contains("slow down"));
    }

    #[test]
    fn provider_error_message_includes_status() {
        let err = RemoteError::Provider {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "provider error (HTTP 502): bad gateway");
        assert_eq!(err.kind(), FailureKind::ProviderError);
    }
}
