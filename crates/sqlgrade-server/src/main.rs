use anyhow::{Context, Result};
use clap::Parser;
use sqlgrade_core::config::load_config;
use sqlgrade_server::config;
use sqlgrade_server::server::Server;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Problem store; overrides SQLGRADE_DB
    #[arg(long)]
    db: Option<PathBuf>,

    /// sqlgrade.yaml with guard and comparison settings; overrides SQLGRADE_CONFIG
    #[arg(long)]
    config: Option<PathBuf>,
}

use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // stdout carries JSON-RPC only; logs go to stderr
    let mut cfg = config::ServerConfig::from_env();
    if let Some(db) = args.db {
        cfg.db = db;
    }
    if let Some(path) = args.config {
        cfg.config_file = Some(path);
    }

    init_logging(&cfg.log_level);

    if let Some(path) = cfg.config_file.clone() {
        let file = load_config(&path, false)
            .with_context(|| format!("failed to load {}", path.display()))?;
        cfg = cfg.with_file_settings(&file);
    }

    tracing::info!(event = "server_start", config = ?cfg);

    Server::run(cfg).await
}
