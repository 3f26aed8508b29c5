pub mod edit_image;
pub mod format;
pub mod generate_image;
pub mod generate_music;
pub mod generate_video;
pub mod url_validation;

use std::time::Duration;

use rmcp::ErrorData as McpError;
use serde::Serialize;
use serde_json::Value;

use crate::jobs::{JobArguments, JobOptions, MediaRef};

#[derive(Serialize)]
pub struct ToolResponse {
    pub endpoint: String,
    pub media: Vec<MediaRef>,
    pub text: String,
}

pub use edit_image::{EditImageRequest, edit_image};
pub use format::{FormattedOutcome, format_outcome};
pub use generate_image::{GenerateImageRequest, generate_image};
pub use generate_music::{GenerateMusicRequest, generate_music};
pub use generate_video::{GenerateVideoRequest, generate_video};
pub use url_validation::validate_http_url;

const MAX_TIMEOUT_SECONDS: u64 = 60 * 60;

pub(crate) fn require_text<'a>(field: &str, value: &'a str) -> Result<&'a str, McpError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(McpError::invalid_params(
            format!("{field} must not be empty"),
            None,
        ));
    }
    Ok(trimmed)
}

pub(crate) fn resolve_model(model: Option<&str>, default: &str) -> String {
    model
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

pub(crate) fn one_of<'a>(
    field: &str,
    value: Option<&'a str>,
    allowed: &[&'a str],
) -> Result<Option<&'a str>, McpError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };
    if allowed.contains(&value) {
        return Ok(Some(value));
    }
    Err(McpError::invalid_params(
        format!("{field} must be one of: {}", allowed.join(", ")),
        Some(Value::String(format!("got: {value}"))),
    ))
}

pub(crate) fn in_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<Option<T>, McpError>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    match value {
        Some(v) if v < min || v > max => Err(McpError::invalid_params(
            format!("{field} must be between {min} and {max}"),
            Some(Value::String(format!("got: {v}"))),
        )),
        other => Ok(other),
    }
}

/// Per-call overrides from the optional `timeout_seconds` tool argument.
pub(crate) fn job_options(timeout_seconds: Option<u64>) -> Result<JobOptions, McpError> {
    let timeout = in_range("timeout_seconds", timeout_seconds, 1, MAX_TIMEOUT_SECONDS)?;
    Ok(JobOptions {
        timeout: timeout.map(Duration::from_secs),
        poll_interval: None,
    })
}

/// Like [`job_options`], but a queued job's timeout must leave room for at
/// least one poll interval.
pub(crate) fn queued_job_options(
    timeout_seconds: Option<u64>,
    poll_interval: Duration,
) -> Result<JobOptions, McpError> {
    let options = job_options(timeout_seconds)?;
    if let Some(timeout) = options.timeout
        && timeout <= poll_interval
    {
        return Err(McpError::invalid_params(
            format!(
                "timeout_seconds must be greater than the poll interval ({}s) for queued jobs",
                poll_interval.as_secs_f64()
            ),
            Some(Value::String(format!("got: {}", timeout.as_secs()))),
        ));
    }
    Ok(options)
}

pub(crate) fn insert<T: Serialize>(arguments: &mut JobArguments, key: &str, value: Option<T>) {
    if let Some(value) = value
        && let Ok(value) = serde_json::to_value(value)
    {
        arguments.insert(key.to_string(), value);
    }
}
