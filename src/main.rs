use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    ServiceExt,
    transport::{
        stdio,
        streamable_http_server::{StreamableHttpService, session::local::LocalSessionManager},
    },
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use media_gen_rmcp::{
    config::{Config, Transport},
    fal::FalClient,
    jobs::JobOrchestrator,
    mcp_server::MediaGenServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("media_gen_rmcp=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    if config.fal.api_key.is_none() {
        warn!("FAL_KEY is not set; every tool call will fail with an authentication error");
    }

    let client = FalClient::new(&config.fal)?;
    let orchestrator = Arc::new(JobOrchestrator::new(Arc::new(client), config.jobs.clone()));

    match config.server.transport {
        Transport::Stdio => {
            info!("media generation MCP server listening on stdio");
            let service = MediaGenServer::new(orchestrator).serve(stdio()).await?;
            service.waiting().await?;
        }
        Transport::Http => {
            let bind_address = config.server.bind_address();
            let mcp_path = config.server.mcp_path();
            let service = StreamableHttpService::new(
                move || Ok(MediaGenServer::new(orchestrator.clone())),
                LocalSessionManager::default().into(),
                Default::default(),
            );
            let router = axum::Router::new().nest_service(&mcp_path, service);
            let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;

            info!("media generation MCP HTTP server started at http://{bind_address}{mcp_path}");

            axum::serve(tcp_listener, router)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
    }
    Ok(())
}
