//! code-sandbox service
//!
//! HTTP service that runs submitted snippets under a per-language
//! interpreter with a hard time budget. Configuration comes from
//! `SANDBOX_CONFIG` (JSON), individual environment variables and flags.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_sandbox::{backend::ProcessBackend, config::Config, http, sandbox::Sandbox};

#[derive(Parser, Debug)]
#[command(name = "code-sandbox")]
#[command(about = "HTTP service for supervised multi-language code execution")]
struct Args {
    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Per-execution timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Directory for scratch files (also the children's working directory)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Directory of extra language recipes, one JSON file each
    #[arg(long, env = "SANDBOX_LANGUAGES_DIR")]
    languages_dir: Option<PathBuf>,

    /// Maximum number of concurrently running child processes
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if let Some(dir) = self.scratch_dir {
            config.scratch_dir = dir;
        }
        if let Some(limit) = self.max_concurrent {
            config.max_concurrent_executions = Some(limit);
        }
        if let Some(dir) = self.languages_dir {
            config.merge_languages(Config::scan_languages_dir(&dir));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let languages = config.language_table()?;

    info!(
        languages = ?languages.identifiers(),
        timeout_ms = config.timeout_ms,
        scratch_dir = %config.scratch_dir.display(),
        "Loaded configuration"
    );

    let sandbox = Sandbox::new(&config, languages, ProcessBackend::new());
    sandbox.prepare().await.with_context(|| {
        format!(
            "Failed to create scratch directory {}",
            config.scratch_dir.display()
        )
    })?;

    http::serve(Arc::new(sandbox), &config.server).await
}
