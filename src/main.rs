use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratelimit_guard::config::GuardConfig;
use ratelimit_guard::{CallContext, Guard, LocalRateLimiter, PolicyRegistry};

/// Policy-driven admission control.
#[derive(Parser)]
#[command(name = "ratelimit-guard", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate a policy registry
    Validate {
        /// Policy registry YAML file
        #[arg(long)]
        policies: PathBuf,
    },
    /// Run guarded calls for one operation against a local limiter
    Simulate {
        /// Guard configuration YAML file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Policy registry YAML file (defaults to `policies_path` from the configuration)
        #[arg(long)]
        policies: Option<PathBuf>,
        /// Operation identity, e.g. `Order.create`
        #[arg(long)]
        operation: String,
        /// Caller address
        #[arg(long, default_value = "127.0.0.1")]
        caller: String,
        /// Named argument as `name=value`; the value is parsed as JSON when possible
        #[arg(long = "arg", value_parser = parse_argument)]
        args: Vec<(String, Value)>,
        /// Number of calls to make
        #[arg(long, default_value_t = 1)]
        calls: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Validate { policies } => {
            let registry = PolicyRegistry::from_file(&policies)
                .with_context(|| format!("Invalid policy registry {}", policies.display()))?;
            println!(
                "{}: {} operations, {} policies",
                policies.display(),
                registry.operation_count(),
                registry.policy_count()
            );
        }
        Command::Simulate {
            config,
            policies,
            operation,
            caller,
            args,
            calls,
        } => {
            let config = GuardConfig::load(config.as_deref())?;
            let policies_path = match policies.or_else(|| config.policies_path.clone().map(PathBuf::from)) {
                Some(path) => path,
                None => bail!("No policy registry given; pass --policies or set policies_path"),
            };
            let registry = PolicyRegistry::from_file(&policies_path)?;

            let limiter = Arc::new(LocalRateLimiter::from_config(&config.limiter));
            info!(window = ?limiter.window(), "Rate limiter initialized");

            let eviction = config.limiter.eviction_interval().map(|interval| {
                info!(interval = ?interval, "Starting rate window eviction task");
                Arc::clone(&limiter).spawn_eviction_task(interval)
            });
            let guard = Guard::with_registry(limiter, registry);

            for call in 1..=calls {
                let ctx = CallContext::new(operation.as_str(), caller.as_str()).with_args(args.clone());
                match guard.guard_operation(&ctx, || ()) {
                    Ok(()) => println!("call {}: admitted", call),
                    Err(e) if e.is_denial() => println!("call {}: denied ({})", call, e),
                    Err(e) => return Err(e.into()),
                }
            }

            if let Some(eviction) = eviction {
                eviction.abort();
            }
        }
    }

    Ok(())
}

fn parse_argument(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("missing argument name in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
