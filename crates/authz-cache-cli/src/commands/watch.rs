// Event stream watcher
//
// Keeps a subscriber running so invalidations show up in the log, until
// Ctrl-C or the optional duration elapses.

use anyhow::{bail, Result};
use authz_cache::{Authorizer, AuthorizerConfig};
use clap::Args;
use std::time::Duration;
use tracing::info;

#[derive(Args)]
pub struct WatchArgs {
    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

/// Run the subscriber until interrupted, then print cache statistics
pub async fn run(mut config: AuthorizerConfig, args: WatchArgs) -> Result<()> {
    config.enable_events = true;
    let events_url = config.events_url();
    let authorizer = Authorizer::new(config, None)?;
    if authorizer.subscriber_phase().is_none() {
        bail!("event subscriber could not be started for {events_url}");
    }
    info!(url = %events_url, "Watching policy events");

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted");
        }
        _ = deadline => info!("Watch duration elapsed"),
    }

    authorizer.close().await;
    println!("{}", serde_json::to_string_pretty(&authorizer.stats())?);
    Ok(())
}
