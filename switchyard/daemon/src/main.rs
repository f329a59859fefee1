//! Switchyard Daemon - Task Dispatch Host
//!
//! Loads configuration, wires providers and agents into the orchestrator and
//! serves a JSON-lines protocol on stdin/stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (Ollama from OLLAMA_HOST / OLLAMA_PORT)
//! switchyard-daemon
//!
//! # With config file
//! switchyard-daemon --config /etc/switchyard/switchyard.toml
//!
//! # Pipe a batch of tasks through and exit when they finish
//! printf '%s\n' '{"op":"submit","description":"Write a haiku"}' | switchyard-daemon
//!
//! # Verbose logging
//! RUST_LOG=debug switchyard-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use switchyard_core::{
    default_config_path, load_config_from_path, ConfigOverrides, RoutingStrategy, SwitchyardConfig,
};

use server::DaemonServer;

/// Switchyard Daemon - priority task dispatch with provider fallback
#[derive(Parser, Debug)]
#[command(name = "switchyard-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHYARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of concurrent dispatch loops
    #[arg(short = 'n', long, value_name = "N")]
    loops: Option<usize>,

    /// Per-call provider timeout in seconds
    #[arg(long, value_name = "SECS")]
    provider_timeout_secs: Option<u64>,

    /// Default routing strategy (quality_first, speed_first, cost_optimized)
    #[arg(short = 's', long, value_name = "STRATEGY", value_parser = parse_strategy)]
    strategy: Option<RoutingStrategy>,

    /// Seconds a task may wait before it is flagged as starving
    #[arg(long, value_name = "SECS")]
    starvation_threshold_secs: Option<u64>,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHYARD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn parse_strategy(s: &str) -> Result<RoutingStrategy, String> {
    RoutingStrategy::parse(s).ok_or_else(|| format!("unknown strategy `{s}`"))
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(loops) = self.loops {
            overrides = overrides.with_dispatch_loops(loops);
        }
        if let Some(secs) = self.provider_timeout_secs {
            overrides = overrides.with_provider_timeout_secs(secs);
        }
        if let Some(strategy) = self.strategy {
            overrides = overrides.with_default_strategy(strategy);
        }
        if let Some(secs) = self.starvation_threshold_secs {
            overrides = overrides.with_starvation_threshold_secs(secs);
        }
        overrides
    }
}

/// Initialize logging with the specified level. Logs go to stderr; stdout
/// carries the protocol.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "switchyard_daemon={level},switchyard_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Resolve configuration: file, then environment, then CLI
fn resolve_config(args: &Args) -> Result<SwitchyardConfig> {
    if let Some(ref explicit) = args.config {
        if !explicit.exists() {
            anyhow::bail!("Config file not found: {explicit:?}");
        }
    }
    let path = args.config.clone().or_else(default_config_path);

    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration after CLI overrides")?;
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Failed to listen for SIGINT");
                        }
                        info!("Received SIGINT, initiating shutdown");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT, initiating shutdown"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGINT, running until stdin closes");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Switchyard daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(
        source = %config.source(),
        config_file = ?config.config_file_path,
        providers = config.providers.len(),
        agents = config.agents.len(),
        loops = config.dispatch_loops,
        strategy = %config.router.default_strategy,
        "Configuration resolved"
    );

    if args.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let server = DaemonServer::from_config(&config)?;
    let result = server.run(shutdown_signal()).await;

    match result {
        Ok(()) => {
            info!("Switchyard daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
