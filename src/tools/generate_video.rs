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
    tools::{
        format_outcome, in_range, insert, queued_job_options, require_text, resolve_model,
        validate_http_url,
    },
};

pub const DEFAULT_VIDEO_MODEL: &str = "fal-ai/wan-i2v";

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GenerateVideoRequest {
    #[schemars(description = "Text description of the video, e.g. 'a slow drone shot of Tokyo at night'")]
    pub prompt: String,
    #[schemars(description = "Starting frame URL for image-to-video models")]
    pub image_url: Option<String>,
    #[schemars(
        description = "fal.ai model endpoint. Default fal-ai/wan-i2v; use a text-to-video model such as fal-ai/kling-video/v2/master/text-to-video without image_url"
    )]
    pub model: Option<String>,
    #[schemars(description = "Video duration in seconds, 2 to 10")]
    pub duration: Option<u32>,
    #[schemars(description = "Aspect ratio such as 16:9, 9:16 or 1:1")]
    pub aspect_ratio: Option<String>,
    #[schemars(description = "What to avoid in the video")]
    pub negative_prompt: Option<String>,
    #[schemars(description = "Classifier-free guidance scale, 0.0 to 1.0")]
    pub cfg_scale: Option<f64>,
    #[schemars(description = "Give up after this many seconds. Default is the server's queued job timeout")]
    pub timeout_seconds: Option<u64>,
}

pub(crate) fn build_arguments(request: &GenerateVideoRequest) -> Result<JobArguments, McpError> {
    let prompt = require_text("prompt", &request.prompt)?;
    let image_url = request
        .image_url
        .as_deref()
        .map(|raw| validate_http_url("image_url", raw))
        .transpose()?;
    let duration = in_range("duration", request.duration, 2, 10)?;
    let cfg_scale = in_range("cfg_scale", request.cfg_scale, 0.0, 1.0)?;

    let mut arguments = JobArguments::new();
    arguments.insert("prompt".to_string(), json!(prompt));
    insert(&mut arguments, "image_url", image_url.as_ref().map(|url| url.as_str()));
    insert(&mut arguments, "duration", duration);
    insert(
        &mut arguments,
        "aspect_ratio",
        request.aspect_ratio.as_deref().map(str::trim),
    );
    insert(&mut arguments, "negative_prompt", request.negative_prompt.as_deref());
    insert(&mut arguments, "cfg_scale", cfg_scale);
    Ok(arguments)
}

pub async fn generate_video(
    orchestrator: &JobOrchestrator,
    Parameters(request): Parameters<GenerateVideoRequest>,
) -> Result<CallToolResult, McpError> {
    let arguments = build_arguments(&request)?;
    let options = queued_job_options(request.timeout_seconds, orchestrator.settings().poll_interval)?;
    let model = resolve_model(request.model.as_deref(), DEFAULT_VIDEO_MODEL);

    info!(model = %model, from_image = arguments.contains_key("image_url"), "generate_video");
    let outcome = orchestrator
        .execute(&JobRequest::queued(model.clone(), arguments), options)
        .await;
    Ok(format_outcome("Video generation", &model, outcome)?.into_call_result())
}
