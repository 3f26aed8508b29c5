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
    tools::{format_outcome, in_range, insert, job_options, require_text, resolve_model, validate_http_url},
};

pub const DEFAULT_EDIT_MODEL: &str = "fal-ai/flux-2/edit";

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct EditImageRequest {
    #[schemars(description = "URL of the image to edit")]
    pub image_url: String,
    #[schemars(description = "Editing instruction, e.g. 'make the sky stormy'")]
    pub prompt: String,
    #[schemars(description = "fal.ai model endpoint. Default fal-ai/flux-2/edit")]
    pub model: Option<String>,
    #[schemars(description = "How strongly to apply the edit, 0.0 to 1.0")]
    pub strength: Option<f64>,
    #[schemars(description = "Seed for reproducible edits")]
    pub seed: Option<u64>,
    #[schemars(description = "Give up after this many seconds")]
    pub timeout_seconds: Option<u64>,
}

pub(crate) fn build_arguments(request: &EditImageRequest) -> Result<JobArguments, McpError> {
    let image_url = validate_http_url("image_url", &request.image_url)?;
    let prompt = require_text("prompt", &request.prompt)?;
    let strength = in_range("strength", request.strength, 0.0, 1.0)?;

    let mut arguments = JobArguments::new();
    arguments.insert("image_url".to_string(), json!(image_url.as_str()));
    arguments.insert("prompt".to_string(), json!(prompt));
    insert(&mut arguments, "strength", strength);
    insert(&mut arguments, "seed", request.seed);
    Ok(arguments)
}

pub async fn edit_image(
    orchestrator: &JobOrchestrator,
    Parameters(request): Parameters<EditImageRequest>,
) -> Result<CallToolResult, McpError> {
    let arguments = build_arguments(&request)?;
    let options = job_options(request.timeout_seconds)?;
    let model = resolve_model(request.model.as_deref(), DEFAULT_EDIT_MODEL);

    info!(model = %model, "edit_image");
    let outcome = orchestrator
        .execute(&JobRequest::fast(model.clone(), arguments), options)
        .await;
    Ok(format_outcome("Image editing", &model, outcome)?.into_call_result())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_source_url_and_strength() {
        let request = EditImageRequest {
            image_url: "ftp://cdn.example/a.png".into(),
            prompt: "add snow".into(),
            ..Default::default()
        };
        assert!(build_arguments(&request).is_err());

        let request = EditImageRequest {
            image_url: "https://cdn.example/a.png".into(),
            prompt: "add snow".into(),
            strength: Some(1.5),
            ..Default::default()
        };
        assert!(build_arguments(&request).is_err());

        let request = EditImageRequest {
            image_url: "https://cdn.example/a.png".into(),
            prompt: "add snow".into(),
            strength: Some(0.6),
            ..Default::default()
        };
        let arguments = build_arguments(&request).unwrap();
        assert_eq!(arguments["image_url"], "https://cdn.example/a.png");
        assert_eq!(arguments["strength"], 0.6);
    }
}
