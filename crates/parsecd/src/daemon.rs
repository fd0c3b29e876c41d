//! Daemon lifecycle: open the index, watch the client root, serve metrics,
//! drain on SIGINT/SIGTERM.

use anyhow::{Context, Result};
use parsec_core::config::ParsecConfig;
use parsec_index::{watch_directory, Indexer, ProtectedNames};
use prometheus_client::registry::Registry;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::metrics::{HealthState, IndexMetrics};

pub async fn run(config: ParsecConfig, passphrase: SecretString, reset: bool) -> Result<()> {
    info!("daemon starting");

    let indexer = Indexer::open(&config, &passphrase)
        .await
        .context("opening index")?;
    drop(passphrase);

    if reset {
        indexer.reset().await.context("resetting index")?;
        warn!("index and stored file copies reset");
    }

    let status = indexer.status().await?;
    info!(
        state = %status.state,
        stable_words = status.stable_words,
        delta_entries = status.delta_entries,
        key = %status.key_fingerprint,
        "index ready"
    );

    // ── Metrics ──────────────────────────────────────────────────────────
    let mut registry = Registry::default();
    let metrics = IndexMetrics::new(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            operator: indexer.scheme().store().operator().clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // ── Watcher → worker pool ────────────────────────────────────────────
    let watch = &config.watch;
    tokio::fs::create_dir_all(&watch.client_root)
        .await
        .with_context(|| format!("creating client root {}", watch.client_root.display()))?;
    let protected = ProtectedNames::new(&watch.protected_patterns)?;

    let (tx, rx) = mpsc::channel(config.daemon.queue_depth);
    let watcher = watch_directory(&watch.client_root, protected, tx)?;

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let concurrency = crate::worker::concurrency(config.daemon.workers);
    let pool = tokio::spawn(crate::worker::run(
        Arc::new(indexer),
        rx,
        metrics,
        concurrency,
        shutdown_rx,
    ));

    notify_ready();

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    // stop event delivery, then let the pool finish what it started
    drop(watcher);
    let _ = shutdown_tx.send(());
    if let Err(e) = pool.await {
        error!("worker pool panicked: {e}");
    }

    info!("daemon exiting cleanly");
    Ok(())
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
