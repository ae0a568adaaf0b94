//! shellmux-server: terminal session daemon.
//!
//! Reads JSON control requests from stdin and writes responses and session
//! events to stdout, one JSON object per line. Logs go to stderr.

use clap::Parser;
use shellmux_core::{ChannelBroadcaster, SystemClock};
use shellmux_server::config::{CliOverrides, ManagerConfig};
use shellmux_server::{driver, PtySpawner, SessionServices, TerminalManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// shellmux-server: terminal session manager
#[derive(Parser, Debug)]
#[command(name = "shellmux-server", version, about = "Terminal session manager")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.shellmux/config.toml")]
    config: String,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Shell command for new sessions
    #[arg(long)]
    shell: Option<String>,

    /// Seconds between monitor sweeps
    #[arg(long)]
    monitor_interval: Option<u64>,

    /// Default working directory for new sessions
    #[arg(long)]
    working_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr.
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting shellmux-server");

    // Load manager config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        max_sessions: cli.max_sessions,
        monitor_interval_secs: cli.monitor_interval,
        shell: cli.shell,
        working_dir: cli.working_dir,
    };
    let config = match ManagerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let events = broadcaster.subscribe();
    let services = SessionServices::new(
        Arc::new(PtySpawner),
        broadcaster.clone(),
        Arc::new(SystemClock),
    );
    let manager = Arc::new(TerminalManager::new(config, services));
    manager.start();

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    tokio::select! {
        result = driver::run(&manager, events, stdin, &mut stdout) => {
            if let Err(e) = result {
                error!(error = %e, "control stream failed");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    manager.stop().await;
    info!("shellmux-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
