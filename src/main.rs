//! Tunnel supervisor.
//!
//! Bootstraps a service fleet behind a WireGuard tunnel.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                       LIFECYCLE CONTROLLER                       │
//!   │                                                                  │
//!   │  ┌──────────┐    ┌──────────┐    ┌────────────┐    ┌──────────┐  │
//!   │  │ secrets  │───▶│  tunnel  │───▶│ supervisor │───▶│  health  │  │
//!   │  │ resolver │    │ manager  │    │  (roles)   │    │aggregator│  │
//!   │  └──────────┘    └────┬─────┘    └─────┬──────┘    └────┬─────┘  │
//!   │                       │                │                │        │
//!   └───────────────────────┼────────────────┼────────────────┼────────┘
//!                           ▼                ▼                ▼
//!                      wg0 interface    child processes   GET /health
//!                     (ip, wg tools)   document-store,
//!                                      app-server,
//!                                      reverse-proxy
//! ```

use clap::Parser;
use std::path::PathBuf;

use tunnel_supervisor::config::{load_config, Environment, SupervisorConfig};
use tunnel_supervisor::lifecycle::{spawn_signal_listener, ExitCode, LifecycleController, StartupError};
use tunnel_supervisor::observability::{logging, metrics};
use tunnel_supervisor::secrets::{EnvSource, SecretResolver};
use tunnel_supervisor::supervisor::topological_order;
use tunnel_supervisor::tunnel::driver;

#[derive(Parser)]
#[command(name = "tunnel-supervisor")]
#[command(about = "Bring up the secure tunnel, then start and supervise the service fleet", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "/etc/tunnel-supervisor/supervisor.toml")]
    config: PathBuf,

    /// Credential set to use; overrides ENVIRONMENT and the config file
    #[arg(short, long)]
    environment: Option<Environment>,

    /// Validate configuration and credentials, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&SupervisorConfig::default().observability);
            StartupError::from(e).report().log();
            return ExitCode::Configuration;
        }
    };
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        roles = config.roles.len(),
        interface = %config.tunnel.interface,
        "tunnel-supervisor starting"
    );

    if cli.check {
        return check(&config);
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let signals = match spawn_signal_listener() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::Configuration;
        }
    };

    let link_driver = driver::from_kind(config.tunnel.driver);
    let controller = match LifecycleController::new(config, EnvSource, link_driver) {
        Ok(controller) => controller,
        Err(e) => {
            e.report().log();
            return e.exit_code();
        }
    };

    let outcome = controller.run(signals).await;
    tracing::info!(state = %outcome.state, exit_code = outcome.exit_code.as_i32(), "Exiting");
    outcome.exit_code
}

/// `--check`: configuration is already validated; confirm credentials resolve.
fn check(config: &SupervisorConfig) -> ExitCode {
    let resolver = SecretResolver::new(EnvSource, config.secrets.clone());
    if let Err(e) = resolver.resolve(config.environment) {
        StartupError::from(e).report().log();
        return ExitCode::Configuration;
    }

    let edges: Vec<(&str, Vec<&str>)> = config
        .roles
        .iter()
        .map(|r| (r.name.as_str(), r.depends_on.iter().map(String::as_str).collect()))
        .collect();
    match topological_order(&edges) {
        Ok(order) => {
            println!("configuration ok");
            println!("  environment: {}", config.environment);
            println!("  tunnel:      {} → {}", config.tunnel.interface, config.tunnel.endpoint);
            println!("  start order: {}", order.join(" → "));
            ExitCode::Clean
        }
        Err(e) => {
            eprintln!("configuration invalid: {}", e);
            ExitCode::Configuration
        }
    }
}
