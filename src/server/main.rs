use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dirindex::api;
use dirindex::core::telemetry::logging::init_logging;
use dirindex::{IndexConfig, IndexManager};

/// Serves per-directory file search over HTTP.
#[derive(Debug, Parser)]
#[command(name = "dirindexd", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7420")]
    bind: SocketAddr,

    /// JSON file with index settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_entries: Option<usize>,

    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Directory name to skip; repeat to build the full set (replaces the defaults).
    #[arg(long = "ignore")]
    ignore: Vec<String>,

    /// Always use the built-in directory walk instead of ripgrep.
    #[arg(long)]
    no_ripgrep: bool,
}

impl Args {
    fn index_config(&self) -> Result<IndexConfig> {
        let mut config = match &self.config {
            Some(path) => IndexConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => IndexConfig::default(),
        };
        if let Some(max_entries) = self.max_entries {
            config.max_entries = max_entries;
        }
        if let Some(debounce_ms) = self.debounce_ms {
            config.debounce_ms = debounce_ms;
        }
        if !self.ignore.is_empty() {
            config.ignored_dirs = self.ignore.clone();
        }
        if self.no_ripgrep {
            config.use_ripgrep = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = args.index_config()?;

    let manager = IndexManager::new(config);
    let app = api::router(manager.clone());

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, "dirindexd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    manager.dispose();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
