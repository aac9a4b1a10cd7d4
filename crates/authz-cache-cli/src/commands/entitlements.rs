// Entitlement lookup command

use anyhow::Result;
use authz_cache::{Authorizer, AuthorizerConfig};
use clap::Args;
use serde_json::json;

#[derive(Args)]
pub struct EntitlementsArgs {
    /// User whose entitlements to list
    #[arg(long)]
    pub username: String,

    /// Group membership (repeatable)
    #[arg(long = "group")]
    pub groups: Vec<String>,
}

/// Print the raw entitlements and the derived allowed actions
pub async fn run(mut config: AuthorizerConfig, args: EntitlementsArgs) -> Result<()> {
    config.enable_events = false;
    let authorizer = Authorizer::new(config, None)?;

    let entitlements = authorizer.entitlements(&args.username, args.groups).await?;
    let output = json!({
        "username": args.username,
        "allowed_actions": entitlements.allowed_actions(),
        "entitlements": entitlements,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
