// Authorization check command
//
// Runs the same check one or more times so the second and later runs show
// cache hits in the printed statistics.

use anyhow::Result;
use authz_cache::{Authorizer, AuthorizerConfig, Context, ContextValue, Decision};
use clap::Args;
use serde_json::json;

#[derive(Args)]
pub struct CheckArgs {
    /// Principal id
    #[arg(long)]
    pub principal: String,

    /// Principal type (defaults to the configured principal type)
    #[arg(long)]
    pub principal_type: Option<String>,

    /// Action to check
    #[arg(long)]
    pub action: String,

    /// Resource type
    #[arg(long)]
    pub resource_type: String,

    /// Resource id
    #[arg(long)]
    pub resource_id: String,

    /// Context attribute as key=value (repeatable)
    #[arg(long = "context", value_parser = parse_context_pair)]
    pub context: Vec<(String, ContextValue)>,

    /// Number of times to run the check
    #[arg(long, default_value = "1")]
    pub repeat: u32,
}

/// Run the check `repeat` times and print each decision, then the stats
pub async fn run(mut config: AuthorizerConfig, args: CheckArgs) -> Result<()> {
    config.enable_events = false;
    let authorizer = Authorizer::new(config, None)?;
    let context: Context = args.context.into_iter().collect();

    for attempt in 1..=args.repeat.max(1) {
        let decision = authorizer
            .decide(
                &args.principal,
                &args.action,
                &args.resource_type,
                &args.resource_id,
                context.clone(),
                args.principal_type.as_deref(),
            )
            .await;

        let line = match &decision {
            Decision::Allowed { reasons } => {
                json!({"attempt": attempt, "decision": "allow", "reasons": reasons})
            }
            Decision::Denied { reasons } => {
                json!({"attempt": attempt, "decision": "deny", "reasons": reasons})
            }
            Decision::Error(error) => json!({"attempt": attempt, "error": error.to_string()}),
        };
        println!("{line}");
    }

    println!("{}", serde_json::to_string_pretty(&authorizer.stats())?);
    authorizer.close().await;
    Ok(())
}

/// Parse `key=value`; `true`/`false` and integers keep their type
pub fn parse_context_pair(raw: &str) -> std::result::Result<(String, ContextValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }

    let value = match value {
        "true" => ContextValue::Bool(true),
        "false" => ContextValue::Bool(false),
        other => match other.parse::<i64>() {
            Ok(number) => ContextValue::Int(number),
            Err(_) => ContextValue::String(other.to_string()),
        },
    };
    Ok((key.to_string(), value))
}
