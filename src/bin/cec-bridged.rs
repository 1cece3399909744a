//! Standalone daemon around the CEC bridge: logs every power and source
//! change, and exits cleanly on SIGINT/SIGTERM.

use cec_bridge::{BridgeConfig, CecBridge, StateObserver};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Observer that just narrates state changes into the log. A real frontend
/// would forward these to its own event bus.
struct LogObserver;

impl StateObserver for LogObserver {
    fn on_power_changed(&mut self, on: bool) {
        info!("display is now {}", if on { "on" } else { "off" });
    }

    fn on_source_changed(&mut self, source: Option<&str>) {
        match source {
            Some(name) => info!("active source is now {}", name),
            None => info!("no external source active"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let (bridge, _handle) = CecBridge::new(BridgeConfig::default(), LogObserver);
    let shutdown = CancellationToken::new();
    let reactor = tokio::spawn(bridge.run(shutdown.clone()));
    info!("started");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    shutdown.cancel();
    reactor.await?;
    info!("exiting");
    Ok(())
}
