//! Flowgate - main entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowgate::{LbConfig, ProxyServer};
use flowgate_dataplane::{BackendRegistry, LbStats, RealServer, SessionTable};

/// Expiry sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Stats heartbeat cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "flowgate", version, about = "L4/L7 TCP load balancer")]
struct Cli {
    /// Load-balancer configuration file (INI)
    #[arg(long = "lb-config", value_name = "FILE", default_value = "config/lb.conf")]
    lb_config: PathBuf,

    /// Log level when RUST_LOG is unset (error|warn|info|debug|trace)
    #[arg(long = "log", value_name = "LEVEL", default_value = "info")]
    log: String,

    /// Print load-balancer options and exit
    #[arg(long = "help-lb", hide = true)]
    help_lb: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.help_lb {
        let _ = Cli::command().print_long_help();
        return;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "fatal: initialization failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("flowgate v{}", env!("CARGO_PKG_VERSION"));

    let config = LbConfig::load(&cli.lb_config)
        .with_context(|| format!("loading {}", cli.lb_config.display()))?;
    config.dump();

    let registry = Arc::new(BackendRegistry::new(config.virtual_nodes));
    for (i, b) in config.backends.iter().enumerate() {
        registry.insert(RealServer::new(i as u32 + 1, b.ip, b.port, b.mac, b.weight));
    }
    if registry.is_empty() {
        warn!("no backends configured; every new connection will be dropped");
    }

    let sessions = Arc::new(SessionTable::new(config.session_timeout));
    let stats = Arc::new(LbStats::new());

    let proxy = Arc::new(
        ProxyServer::bind(
            config.vip,
            &config.ports,
            Arc::clone(&registry),
            Arc::clone(&sessions),
            Arc::clone(&stats),
        )
        .await
        .context("binding VIP listeners")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let proxy_task = tokio::spawn(Arc::clone(&proxy).run(shutdown_rx.clone()));

    spawn_session_sweeper(Arc::clone(&sessions), shutdown_rx.clone());
    spawn_heartbeat(Arc::clone(&stats), Arc::clone(&sessions), shutdown_rx);

    wait_for_shutdown().await;

    shutdown_tx.send(true).ok();
    proxy_task.await.ok();

    let snap = stats.snapshot();
    info!(
        total_sessions = sessions.total(),
        rx = snap.rx_packets,
        tx = snap.tx_packets,
        forwarded = snap.forwarded,
        dropped = snap.dropped,
        "final stats"
    );
    Ok(())
}

/// Periodically expire idle sessions.
fn spawn_session_sweeper(sessions: Arc<SessionTable>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = sessions.cleanup();
                    if removed > 0 {
                        debug!(removed, "expired idle sessions");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// Periodically log a stats heartbeat.
fn spawn_heartbeat(
    stats: Arc<LbStats>,
    sessions: Arc<SessionTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
        tick.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let snap = stats.snapshot();
                    info!(
                        active = sessions.active(),
                        total = sessions.total(),
                        rx = snap.rx_packets,
                        tx = snap.tx_packets,
                        forwarded = snap.forwarded,
                        dropped = snap.dropped,
                        "stats"
                    );
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}
