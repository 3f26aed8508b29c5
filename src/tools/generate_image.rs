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
    tools::{format_outcome, in_range, insert, job_options, one_of, require_text, resolve_model},
};

pub const DEFAULT_IMAGE_MODEL: &str = "fal-ai/flux/schnell";

const IMAGE_SIZES: &[&str] = &[
    "square_hd",
    "square",
    "portrait_4_3",
    "portrait_16_9",
    "landscape_4_3",
    "landscape_16_9",
];
const OUTPUT_FORMATS: &[&str] = &["jpeg", "png", "webp"];

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GenerateImageRequest {
    #[schemars(description = "Text description of the image to generate")]
    pub prompt: String,
    #[schemars(description = "fal.ai model endpoint, e.g. fal-ai/flux/schnell (default) or fal-ai/flux-pro")]
    pub model: Option<String>,
    #[schemars(description = "What to avoid in the image")]
    pub negative_prompt: Option<String>,
    #[schemars(
        description = "Preset size: square_hd, square, portrait_4_3, portrait_16_9, landscape_4_3, landscape_16_9. Default landscape_4_3"
    )]
    pub image_size: Option<String>,
    #[schemars(description = "Number of images, 1 to 4. Default 1")]
    pub num_images: Option<u32>,
    #[schemars(description = "Seed for reproducible generation")]
    pub seed: Option<u64>,
    #[schemars(description = "Filter inappropriate content. Default true")]
    pub enable_safety_checker: Option<bool>,
    #[schemars(description = "Output format: jpeg, png or webp")]
    pub output_format: Option<String>,
    #[schemars(description = "Give up after this many seconds")]
    pub timeout_seconds: Option<u64>,
}

pub(crate) fn build_arguments(request: &GenerateImageRequest) -> Result<JobArguments, McpError> {
    let prompt = require_text("prompt", &request.prompt)?;
    let image_size = one_of("image_size", request.image_size.as_deref(), IMAGE_SIZES)?;
    let output_format = one_of("output_format", request.output_format.as_deref(), OUTPUT_FORMATS)?;
    let num_images = in_range("num_images", request.num_images, 1, 4)?;

    let mut arguments = JobArguments::new();
    arguments.insert("prompt".to_string(), json!(prompt));
    insert(
        &mut arguments,
        "negative_prompt",
        request
            .negative_prompt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty()),
    );
    insert(&mut arguments, "image_size", image_size);
    insert(&mut arguments, "num_images", num_images);
    insert(&mut arguments, "seed", request.seed);
    insert(&mut arguments, "enable_safety_checker", request.enable_safety_checker);
    insert(&mut arguments, "output_format", output_format);
    Ok(arguments)
}

pub async fn generate_image(
    orchestrator: &JobOrchestrator,
    Parameters(request): Parameters<GenerateImageRequest>,
) -> Result<CallToolResult, McpError> {
    let arguments = build_arguments(&request)?;
    let options = job_options(request.timeout_seconds)?;
    let model = resolve_model(request.model.as_deref(), DEFAULT_IMAGE_MODEL);

    info!(model = %model, "generate_image");
    let outcome = orchestrator
        .execute(&JobRequest::fast(model.clone(), arguments), options)
        .await;
    Ok(format_outcome("Image generation", &model, outcome)?.into_call_result())
}
