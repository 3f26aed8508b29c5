use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};

use crate::jobs::JobOrchestrator;
use crate::tools::{
    EditImageRequest, GenerateImageRequest, GenerateMusicRequest, GenerateVideoRequest,
};

const INSTRUCTIONS: &str = "Generates images, video and music with fal.ai models. \
Image tools answer within seconds; video and music run on the fal queue and can take minutes. \
Show produced media with ![](url) for images and plain links for video and audio.";

#[derive(Clone)]
pub struct MediaGenServer {
    tool_router: ToolRouter<Self>,
    orchestrator: Arc<JobOrchestrator>,
}

impl MediaGenServer {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            orchestrator,
        }
    }
}

#[tool_router]
impl MediaGenServer {
    #[tool(
        description = "Generate images from a text prompt with a fal.ai model (default fal-ai/flux/schnell). Show results with ![](url)"
    )]
    async fn generate_image(
        &self,
        Parameters(request): Parameters<GenerateImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::generate_image(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Edit an image at a URL following a text instruction. Show results with ![](url)")]
    async fn edit_image(
        &self,
        Parameters(request): Parameters<EditImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::edit_image(&self.orchestrator, Parameters(request)).await
    }

    #[tool(
        description = "Generate a short video from a prompt, optionally starting from an image URL. Runs on the fal queue; warn the user it may take a few minutes"
    )]
    async fn generate_video(
        &self,
        Parameters(request): Parameters<GenerateVideoRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::generate_video(&self.orchestrator, Parameters(request)).await
    }

    #[tool(
        description = "Generate music from a description, with optional lyrics. Runs on the fal queue; warn the user it may take a few minutes"
    )]
    async fn generate_music(
        &self,
        Parameters(request): Parameters<GenerateMusicRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::generate_music(&self.orchestrator, Parameters(request)).await
    }
}

#[tool_handler]
impl ServerHandler for MediaGenServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }
}
