use anyhow::Result;
use chrono::Utc;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;
use watchpost::app::{reset_ledger, Watchpost};
use watchpost::config::WatchpostConfig;

const DEFAULT_CONFIG_PATH: &str = "config/watchpost.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("watchpost=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let reset = args.iter().any(|a| a == "--reset-cooldowns");
    let positional: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "--reset-cooldowns")
        .collect();

    match positional.as_slice() {
        ["--help" | "-h", ..] => {
            print_usage();
            Ok(())
        }
        ["reset-cooldowns"] => run_reset(DEFAULT_CONFIG_PATH),
        ["reset-cooldowns", config_path] => run_reset(config_path),
        [] => run(DEFAULT_CONFIG_PATH, reset).await,
        [config_path] if !config_path.starts_with('-') => run(config_path, reset).await,
        _ => {
            print_usage();
            anyhow::bail!("unrecognized arguments: {}", args.join(" "))
        }
    }
}

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  watchpost [config.toml] [--reset-cooldowns]");
    eprintln!("      Scan all rules once, or every scan_interval_secs when set.");
    eprintln!("      --reset-cooldowns clears the cooldown ledger before the first cycle.");
    eprintln!("  watchpost reset-cooldowns [config.toml]");
    eprintln!("      Clear the cooldown ledger and exit.");
    eprintln!("  watchpost --help");
    eprintln!();
    eprintln!("The config path defaults to {DEFAULT_CONFIG_PATH}.");
}

/// Clears the ledger without touching observers or providers.
fn run_reset(config_path: &str) -> Result<()> {
    let config = WatchpostConfig::load(config_path)?;
    reset_ledger(&config)
}

async fn run(config_path: &str, reset: bool) -> Result<()> {
    let config = WatchpostConfig::load(config_path)?;
    tracing::info!(
        config = config_path,
        rules = config.rules.len(),
        providers = config.providers.len(),
        ledger = %config.ledger_path.display(),
        "watchpost starting"
    );

    if reset {
        reset_ledger(&config)?;
    }
    let mut watchpost = Watchpost::new(config)?;

    let Some(period) = watchpost.config().scan_interval() else {
        watchpost.run_cycle(Utc::now()).await?;
        return Ok(());
    };

    tracing::info!(interval_secs = period.as_secs(), "Starting scan loop");
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = watchpost.run_cycle(Utc::now()).await {
                    tracing::error!(error = %e, "Scan cycle failed");
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Shutting down gracefully");
                break;
            }
        }
    }

    Ok(())
}
