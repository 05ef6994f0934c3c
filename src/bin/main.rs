use cash_position_orchestrator::{
    config::OrchestratorConfig,
    models::{DispatchMode, QueryRequest},
    orchestrator::Orchestrator,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ask a cash-position question against a table snapshot.
#[derive(Debug, Parser)]
#[command(name = "cashpos", version, about)]
struct Cli {
    /// The question, in Spanish or English
    question: String,

    /// JSON snapshot of the table (`split` or `records` orientation)
    #[arg(long, short = 's')]
    snapshot: Option<PathBuf>,

    /// Dispatch mode: single, team or chat
    #[arg(long, short = 'm')]
    mode: Option<DispatchMode>,

    /// Model name for team and chat modes
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Keep notes in memory only, leaving the JSONL log untouched
    #[arg(long)]
    no_memory_file: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = OrchestratorConfig::from_env()?;
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(temperature) = cli.temperature {
        config.llm.temperature = temperature;
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.llm.max_tokens = max_tokens;
    }
    if cli.no_memory_file {
        config.memory_path = None;
    }

    let mut request = QueryRequest::new(cli.question);
    if let Some(path) = &cli.snapshot {
        let raw = tokio::fs::read_to_string(path).await?;
        request = request.with_snapshot(serde_json::from_str(&raw)?);
    }
    request.mode = cli.mode;

    info!(config = ?config.llm, "Cash position orchestrator starting");
    let orchestrator = Orchestrator::from_config(config)?;

    let response = orchestrator.handle_query(request).await?;
    println!("{}", response.result_text);
    println!("\n[agent: {}]", response.agent_label);
    if let Some(diagnostic) = response.diagnostic {
        println!("[diagnostic: {:?}]", diagnostic);
    }

    Ok(())
}
