//! mlomgrd entry point.
//!
//! Runs the multi-link coordinator against the simulated driver until
//! SIGINT.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mlomgr::audit::{AuditCategory, AuditOutcome, AuditRecord};
use mlomgr::config::DEFAULT_CONFIG_PATH;
use mlomgr::{audit_log, MloConfig, MloDaemon, MloDaemonConfig, SimulatedDriver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Multi-link device coordination daemon
#[derive(Parser, Debug)]
#[command(name = "mlomgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Write the default configuration to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Some(path) = args.write_default_config {
        return match MloConfig::default().save(&path) {
            Ok(()) => {
                info!(path = %path.display(), "wrote default configuration");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "failed to write configuration");
                ExitCode::FAILURE
            }
        };
    }

    let config = match MloConfig::load_or_default(&args.config).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        max_aid = config.pools.max_aid,
        max_ml_peers = config.pools.max_ml_peers,
        max_links_per_group = config.group.max_links_per_group,
        "Starting mlomgrd (simulated driver)"
    );
    audit_log!(
        AuditRecord::new(AuditCategory::ConfigurationChange, "mlomgrd", "load_config")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(args.config.display().to_string())
            .with_details(serde_json::json!({
                "max_aid": config.pools.max_aid,
                "max_ml_peers": config.pools.max_ml_peers,
                "max_links_per_group": config.group.max_links_per_group,
                "event_queue_depth": config.daemon.event_queue_depth,
            }))
    );

    let daemon = MloDaemon::new(MloDaemonConfig::from(&config), Arc::new(SimulatedDriver::new()));
    let handle = daemon.handle();

    let shutdown = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down");
                if handle.shutdown().await.is_err() {
                    warn!("daemon already stopped");
                }
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    daemon.run().await;
    shutdown.abort();

    info!("mlomgrd shutdown complete");
    ExitCode::SUCCESS
}
