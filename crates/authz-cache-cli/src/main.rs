//! Command-line client for the authorization decision cache
//!
//! Runs checks through the cache, looks up entitlements and watches the
//! policy event stream of a running authorization service.

use anyhow::{Context as _, Result};
use authz_cache::AuthorizerConfig;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod commands;

use commands::{check, entitlements, watch};

#[derive(Parser)]
#[command(name = "authz-cache")]
#[command(about = "Cached authorization checks with push invalidation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".authz/config.toml")]
    config: PathBuf,

    /// Override the service base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Override the application id
    #[arg(long, global = true)]
    app_id: Option<i64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an authorization check through the cache
    Check(check::CheckArgs),

    /// List a user's entitlements and allowed actions
    Entitlements(entitlements::EntitlementsArgs),

    /// Subscribe to policy events and log invalidations
    Watch(watch::WatchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut config = load_config(&cli.config)?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(app_id) = cli.app_id {
        config.app_id = app_id;
    }

    match cli.command {
        Commands::Check(args) => check::run(config, args).await,
        Commands::Entitlements(args) => entitlements::run(config, args).await,
        Commands::Watch(args) => watch::run(config, args).await,
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path) -> Result<AuthorizerConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file; using defaults");
        return Ok(AuthorizerConfig::default());
    }
    AuthorizerConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}
