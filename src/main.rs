use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{GatekeeperConfig, LoggingConfig};
use gatekeeper::error::GatekeeperError;
use gatekeeper::ratelimit::{self, Limiter, RateLimitGuard, RateLimitKey, Rule, RuleSet};

#[derive(Parser)]
#[command(name = "gatekeeper", version, about = "Fixed-window request-rate limiter")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved rule table as JSON
    Rules,
    /// Drive a burst of requests through the limiter and report the outcome
    Simulate {
        /// Operation name used to resolve the rule
        #[arg(long)]
        operation: String,
        /// Caller identity the calls are counted against
        #[arg(long, default_value = "127.0.0.1")]
        caller: String,
        /// Total number of calls
        #[arg(long, default_value_t = 1)]
        calls: u32,
        /// Number of concurrent tasks issuing the calls
        #[arg(long, default_value_t = 1)]
        concurrency: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GatekeeperConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules = Arc::new(RuleSet::from_config(&config.rate_limiting)?);

    match cli.command {
        Command::Rules => {
            println!("{}", serde_json::to_string_pretty(&rules_report(&rules))?);
        }
        Command::Simulate {
            operation,
            caller,
            calls,
            concurrency,
        } => {
            let (limiter, sweeper) = ratelimit::start(&config.rate_limiting)?;
            let guard = RateLimitGuard::new(limiter, rules);

            tokio::select! {
                report = simulate(&guard, &operation, &caller, calls, concurrency) => {
                    println!("{}", serde_json::to_string_pretty(&report?)?);
                }
                _ = shutdown_signal() => {}
            }

            sweeper.shutdown().await;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn rule_json(rule: Rule) -> serde_json::Value {
    json!({
        "rate": rule.rate(),
        "window_secs": rule.window().as_secs_f64(),
    })
}

fn rules_report(rules: &RuleSet) -> serde_json::Value {
    let operations: serde_json::Map<String, serde_json::Value> = rules
        .iter()
        .map(|(operation, rule)| (operation.to_string(), rule_json(rule)))
        .collect();

    json!({
        "default": rule_json(rules.default_rule()),
        "operations": operations,
    })
}

/// Spread `calls` over `concurrency` tasks and tally the decisions.
async fn simulate(
    guard: &RateLimitGuard<dyn Limiter>,
    operation: &str,
    caller: &str,
    calls: u32,
    concurrency: u32,
) -> anyhow::Result<serde_json::Value> {
    let workers = concurrency.clamp(1, calls.max(1));
    info!(operation = %operation, caller = %caller, calls, workers, "Starting simulation");

    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        let share = calls / workers + u32::from(worker < calls % workers);
        let guard = guard.clone();
        let operation = operation.to_string();
        let caller = caller.to_string();

        tasks.spawn(async move {
            let mut allowed = 0u32;
            for _ in 0..share {
                if guard.check(&operation, &caller).await?.is_allowed() {
                    allowed += 1;
                }
            }
            Ok::<_, GatekeeperError>(allowed)
        });
    }

    let mut allowed = 0u32;
    while let Some(joined) = tasks.join_next().await {
        allowed += joined??;
    }

    let rule = guard.rules().resolve(operation);
    Ok(json!({
        "key": RateLimitKey::new(operation, caller).to_string_key(),
        "rule": rule_json(rule),
        "calls": calls,
        "allowed": allowed,
        "denied": calls - allowed,
        "count": guard.count(operation, caller).await?,
    }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping simulation");
        }
    }
}
