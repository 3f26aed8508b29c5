use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    jobs::{JobArguments, JobOrchestrator, JobRequest},
    tools::{format_outcome, in_range, insert, queued_job_options, require_text, resolve_model},
};

pub const DEFAULT_MUSIC_MODEL: &str = "fal-ai/lyria2";
const DEFAULT_DURATION_SECONDS: u32 = 30;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GenerateMusicRequest {
    #[schemars(description = "Description of the music: genre, mood, instruments")]
    pub prompt: String,
    #[schemars(description = "fal.ai model endpoint. Default fal-ai/lyria2")]
    pub model: Option<String>,
    #[schemars(description = "Duration in seconds, 5 to 300. Default 30")]
    pub duration_seconds: Option<u32>,
    #[schemars(description = "What to avoid, e.g. 'vocals, distortion'")]
    pub negative_prompt: Option<String>,
    #[schemars(description = "Lyrics for models that support vocals, e.g. '[verse]\\nline one'")]
    pub lyrics_prompt: Option<String>,
    #[schemars(description = "Give up after this many seconds. Default is the server's queued job timeout")]
    pub timeout_seconds: Option<u64>,
}

pub(crate) fn build_arguments(request: &GenerateMusicRequest) -> Result<JobArguments, McpError> {
    let prompt = require_text("prompt", &request.prompt)?;
    let duration = in_range("duration_seconds", request.duration_seconds, 5, 300)?
        .unwrap_or(DEFAULT_DURATION_SECONDS);

    let mut arguments = JobArguments::new();
    arguments.insert("prompt".to_string(), json!(prompt));
    arguments.insert("duration_seconds".to_string(), json!(duration));
    insert(&mut arguments, "negative_prompt", request.negative_prompt.as_deref());
    insert(&mut arguments, "lyrics_prompt", request.lyrics_prompt.as_deref());
    Ok(arguments)
}

pub async fn generate_music(
    orchestrator: &JobOrchestrator,
    Parameters(request): Parameters<GenerateMusicRequest>,
) -> Result<CallToolResult, McpError> {
    let arguments = build_arguments(&request)?;
    let options = queued_job_options(request.timeout_seconds, orchestrator.settings().poll_interval)?;
    let model = resolve_model(request.model.as_deref(), DEFAULT_MUSIC_MODEL);

    info!(model = %model, duration_seconds = %arguments["duration_seconds"], "generate_music");
    let outcome = orchestrator
        .execute(&JobRequest::queued(model.clone(), arguments), options)
        .await;
    Ok(format_outcome("Music generation", &model, outcome)?.into_call_result())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_defaults_to_thirty_seconds() {
        let request = GenerateMusicRequest {
            prompt: "lofi beats".into(),
            ..Default::default()
        };
        let arguments = build_arguments(&request).unwrap();
        assert_eq!(arguments["duration_seconds"], 30);
        assert!(!arguments.contains_key("lyrics_prompt"));
    }

    #[test]
    fn rejects_too_long_tracks() {
        let request = GenerateMusicRequest {
            prompt: "symphony".into(),
            duration_seconds: Some(600),
            ..Default::default()
        };
        assert!(build_arguments(&request).is_err());
    }
}
