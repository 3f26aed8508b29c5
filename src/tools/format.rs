//! Renders job outcomes as tool output.

use std::fmt::Write as _;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};

use crate::jobs::{FailureKind, JobFailure, JobOutcome};
use crate::tools::ToolResponse;

const MAX_LOG_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedOutcome {
    pub is_error: bool,
    pub text: String,
    /// JSON listing of produced media, present on success.
    pub json: Option<String>,
}

impl FormattedOutcome {
    fn error(text: String) -> Self {
        Self {
            is_error: true,
            text,
            json: None,
        }
    }

    pub fn into_call_result(self) -> CallToolResult {
        let mut content = vec![Content::text(self.text)];
        if let Some(json) = self.json {
            content.push(Content::text(json));
        }
        if self.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

/// `action` names the work in a sentence, e.g. "Video generation".
pub fn format_outcome(
    action: &str,
    endpoint: &str,
    outcome: JobOutcome,
) -> Result<FormattedOutcome, McpError> {
    match outcome {
        JobOutcome::Success(payload) if payload.media.is_empty() => Ok(FormattedOutcome::error(
            format!("{action} with {endpoint} completed but returned no media. Please try again."),
        )),
        JobOutcome::Success(payload) => {
            let mut text = format!("{action} with {endpoint} succeeded:");
            for media in &payload.media {
                let _ = write!(text, "\n- {}", media.url);
            }
            let response = ToolResponse {
                endpoint: endpoint.to_string(),
                media: payload.media,
                text: format!("{action} succeeded."),
            };
            let json = serde_json::to_string(&response).map_err(|err| {
                McpError::internal_error(
                    "serialize tool response failed",
                    Some(serde_json::Value::String(err.to_string())),
                )
            })?;
            Ok(FormattedOutcome {
                is_error: false,
                text,
                json: Some(json),
            })
        }
        JobOutcome::Failure(failure) => Ok(FormattedOutcome::error(describe_failure(
            action, endpoint, &failure,
        ))),
        JobOutcome::TimedOut { elapsed } => Ok(FormattedOutcome::error(format!(
            "{action} with {endpoint} timed out after {}s. \
The model may still be busy; retry with a larger timeout_seconds.",
            elapsed.as_secs()
        ))),
    }
}

fn describe_failure(action: &str, endpoint: &str, failure: &JobFailure) -> String {
    let mut text = format!(
        "{action} with {endpoint} failed ({}): {}",
        failure.kind, failure.message
    );
    match failure.kind {
        FailureKind::AuthenticationMissing => {
            text.push_str("\nCheck that FAL_KEY is set to a valid fal.ai API key.");
        }
        FailureKind::RateLimited => match failure.retry_after {
            Some(delay) => {
                let _ = write!(text, "\nThe provider asked to retry after {}s.", delay.as_secs());
            }
            None => text.push_str("\nThe provider is throttling requests; retry later."),
        },
        _ => {}
    }
    if !failure.logs.is_empty() {
        text.push_str("\nProvider logs:");
        let skip = failure.logs.len().saturating_sub(MAX_LOG_LINES);
        for line in failure.logs.iter().skip(skip) {
            let _ = write!(text, "\n  {line}");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::{JobPayload, MediaKind, MediaRef};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn success_lists_media() {
        let outcome = JobOutcome::Success(JobPayload {
            media: vec![MediaRef {
                kind: MediaKind::Video,
                url: "https://cdn.example/clip.mp4".into(),
                content_type: Some("video/mp4".into()),
                file_name: None,
            }],
            raw: json!({}),
        });
        let formatted = format_outcome("Video generation", "fal-ai/wan-i2v", outcome).unwrap();

        assert!(!formatted.is_error);
        assert_eq!(
            formatted.text,
            "Video generation with fal-ai/wan-i2v succeeded:\n- https://cdn.example/clip.mp4"
        );
        let json: serde_json::Value = serde_json::from_str(&formatted.json.unwrap()).unwrap();
        assert_eq!(json["media"][0]["kind"], "video");
        assert_eq!(json["media"][0]["mimeType"], "video/mp4");
    }

    #[test]
    fn empty_success_is_reported_as_error() {
        let outcome = JobOutcome::Success(JobPayload {
            media: Vec::new(),
            raw: json!({"seed": 3}),
        });
        let formatted = format_outcome("Image generation", "fal-ai/flux/schnell", outcome).unwrap();
        assert!(formatted.is_error);
        assert!(formatted.text.contains("returned no media"));
    }

    #[test]
    fn rate_limit_mentions_retry_hint() {
        let mut failure = JobFailure::new(FailureKind::RateLimited, "rate limited: slow down");
        failure.retry_after = Some(Duration::from_secs(30));
        let formatted =
            format_outcome("Music generation", "fal-ai/lyria2", JobOutcome::Failure(failure)).unwrap();
        assert!(formatted.is_error);
        assert!(formatted.text.contains("(rate limited)"));
        assert!(formatted.text.contains("retry after 30s"));
    }

    #[test]
    fn job_failure_shows_last_logs() {
        let logs = (1..=8).map(|n| format!("line {n}")).collect();
        let failure =
            JobFailure::new(FailureKind::ProviderJobFailed, "worker crashed").with_logs(logs);
        let formatted =
            format_outcome("Video generation", "fal-ai/wan-i2v", JobOutcome::Failure(failure)).unwrap();
        assert!(formatted.text.contains("failed (job failed): worker crashed"));
        assert!(!formatted.text.contains("line 3"));
        assert!(formatted.text.contains("line 4"));
        assert!(formatted.text.contains("line 8"));
    }

    #[test]
    fn timeout_reports_elapsed() {
        let formatted = format_outcome(
            "Video generation",
            "fal-ai/wan-i2v",
            JobOutcome::TimedOut {
                elapsed: Duration::from_secs(180),
            },
        )
        .unwrap();
        assert!(formatted.is_error);
        assert!(formatted.text.contains("timed out after 180s"));
    }
}
