#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use chatrelay::agent::TurnOptions;
use chatrelay::gateway::{self, AppState};
use chatrelay::tools::FileManager;
use chatrelay::{channels, providers, Config};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(
    about = "Relay chat turns to an OpenAI-compatible model, with sandboxed file tools.",
    long_about = None
)]
struct Cli {
    /// Run an interactive terminal session instead of the WebSocket gateway
    #[arg(long)]
    local: bool,

    /// Conversation log written in terminal mode [default: webchat.log]
    #[arg(long)]
    output: Option<PathBuf>,

    /// Working directory for file tools; the gateway only enables tools when set
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Gateway bind host [default: 127.0.0.1]
    #[arg(long)]
    host: Option<String>,

    /// Gateway port [default: 21048]
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding config.toml [default: ~/.chatrelay]
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Request whole replies instead of streamed fragments
    #[arg(long)]
    no_stream: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.log.output.clone_from(output);
        }
        if let Some(host) = &self.host {
            config.gateway.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if self.no_stream {
            config.streaming = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with streamed replies.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let mut config = Config::load_or_init(cli.config_dir.as_deref()).await?;
    config.apply_env_overrides();
    cli.apply_to(&mut config);

    if config.api_key.is_none() {
        warn!(
            "No API key configured; set CHATRELAY_API_KEY or api_key in {}",
            config.config_path.display()
        );
    }
    let provider = providers::create_provider(&config);
    info!(model = %config.model, streaming = config.streaming, "Provider ready");

    if cli.local {
        let root = match &cli.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let files = FileManager::new(&root)
            .with_context(|| format!("Invalid working directory {}", root.display()))?;
        return channels::cli::run(
            &provider,
            files,
            TurnOptions::from_config(&config),
            &config.log.output,
        )
        .await;
    }

    if let Some(dir) = &cli.dir {
        FileManager::new(dir)
            .with_context(|| format!("Invalid working directory {}", dir.display()))?;
    }
    let state = AppState::new(Arc::new(provider), &config, cli.dir.clone());
    gateway::run_gateway(&config.gateway.host, config.gateway.port, state).await
}
