//! The monitor loop: broker connection, engine, signal handling.

use std::time::Duration;

use anyhow::{Context, Result};
use gtm_net::{TcpLineTransport, engine, supervisor};
use gtm_store::SnapshotStore;
use tokio::sync::mpsc;
use tracing::info;

use crate::Config;

pub fn run(config: &Config, store: Box<dyn SnapshotStore + Send>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    runtime.block_on(monitor(config, store))
}

async fn monitor(config: &Config, store: Box<dyn SnapshotStore + Send>) -> Result<()> {
    let (payload_tx, payload_rx) = mpsc::channel(256);
    let (engine, engine_handle) = engine(
        store,
        Duration::from_secs(config.save_interval_secs),
        payload_rx,
    );
    let engine_task = tokio::spawn(engine.run());

    let transport = TcpLineTransport::new(
        config.endpoint.clone(),
        Duration::from_millis(config.connect_timeout_ms),
    );
    let (supervisor, supervisor_handle) = supervisor(transport, config.channel.clone(), payload_tx);
    tokio::spawn(supervisor.run());
    supervisor_handle.connect().await;
    info!(endpoint = %config.endpoint, channel = %config.channel, "monitor started");

    // Log connection state transitions.
    {
        let mut state = supervisor_handle.state();
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                info!(?current, "connection state changed");
            }
        });
    }

    // SIGHUP forces an immediate reconnect attempt, the headless analog of
    // a dashboard regaining foreground attention.
    #[cfg(unix)]
    {
        let handle = supervisor_handle.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let Ok(mut hangup) = signal(SignalKind::hangup()) else {
                return;
            };
            while hangup.recv().await.is_some() {
                info!("received SIGHUP; forcing a reconnect attempt");
                handle.kick().await;
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    supervisor_handle.disconnect().await;
    engine_handle
        .save()
        .await
        .context("final snapshot save failed")?;
    drop(engine_handle);
    // The engine drains its queue and exits once every handle is gone.
    let _ = engine_task.await;
    Ok(())
}
