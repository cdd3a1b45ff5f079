//! The storage-device daemon entrypoint.
//!
//! Wires the ambient stack (logging, configuration) to the registry: owns
//! the system-bus connection, runs coldplug and the housekeeping ticker via
//! [`udisks2_linux_provider::Registry::start`], and feeds the live kernel
//! uevent stream into it until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use tokio::io::unix::AsyncFd;

use udisks2_linux_provider::cleanup::NoopCleanup;
use udisks2_linux_provider::config::Config;
use udisks2_linux_provider::config_monitor::NoopConfigMonitor;
use udisks2_linux_provider::device::Snapshot;
use udisks2_linux_provider::registry::Registry;
use udisks2_linux_provider::{logging, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    logging::init(&config.log_filter);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");

    let connection = zbus::Connection::system().await?;
    connection.request_name("org.freedesktop.UDisks2").await?;

    // The cleanup subsystem and the fstab/crypttab watchers are external
    // collaborators outside this crate's scope; a real deployment wires
    // in its own implementations here.
    let registry = Registry::start(
        connection,
        &config,
        Arc::new(NoopCleanup),
        Arc::new(NoopConfigMonitor::default()),
    )
    .await?;

    let monitor = udev::MonitorBuilder::new()?
        .match_subsystem("block")?
        .listen()?;
    let mut monitor = AsyncFd::new(monitor)?;

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            guard = monitor.readable_mut() => {
                let mut guard = guard?;
                for event in guard.get_inner_mut().iter() {
                    let Some(action) = event.action().and_then(|a| a.to_str()) else {
                        continue;
                    };
                    let action = action.to_owned();
                    let snapshot = Snapshot::from_udev(&event);
                    registry.handle_uevent(&action, snapshot).await;
                }
                guard.clear_ready();
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
