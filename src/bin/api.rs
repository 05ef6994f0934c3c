use cash_position_orchestrator::{api::start_server, config::OrchestratorConfig, orchestrator::Orchestrator};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Loads .env as well
    let config = OrchestratorConfig::from_env()?;

    if config.llm.api_key.is_none() {
        warn!("OPENAI_API_KEY not set and no API.txt found; team and chat modes will fail");
    }

    let port = config.port;
    info!("Cash Position Orchestrator - API Server");
    info!(port, mode = ?config.default_mode, memory = ?config.memory_path, "Configuration loaded");

    let orchestrator = Arc::new(Orchestrator::from_config(config)?);

    info!("Orchestrator initialized, starting API server");
    start_server(orchestrator, port).await?;

    Ok(())
}
