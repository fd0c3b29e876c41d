//! Event worker pool.
//!
//! Pulls file events off the watcher queue and runs each as its own task,
//! at most `concurrency` at a time. A failed file is logged and counted; it
//! never stops the pool. On shutdown the pool stops taking events and waits
//! for in-flight tasks to finish.

use std::sync::Arc;

use parsec_index::{FileEvent, Indexer};
use parsec_storage::TableStore;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{error, info, warn, Instrument};

use crate::metrics::IndexMetrics;

/// Worker count for a configured value; 0 means one per CPU.
pub fn concurrency(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub async fn run<S: TableStore>(
    indexer: Arc<Indexer<S>>,
    mut events: mpsc::Receiver<FileEvent>,
    metrics: IndexMetrics,
    concurrency: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    info!(concurrency, "worker pool ready");

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("worker: shutdown signal received, draining...");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    info!("worker: event queue closed");
                    break;
                }
            },
        };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let indexer = indexer.clone();
        let metrics = metrics.clone();
        let span = tracing::info_span!("file", path = %event.path().display());
        tokio::spawn(
            async move {
                let _permit = permit; // released when the task completes
                process(&indexer, event, &metrics).await;
            }
            .instrument(span),
        );
    }

    // Drain: wait for all in-flight tasks
    let _ = semaphore.acquire_many(concurrency as u32).await;
    info!("worker: all in-flight tasks complete");
}

/// Index or retract one file, recording the outcome.
pub async fn process<S: TableStore>(indexer: &Indexer<S>, event: FileEvent, metrics: &IndexMetrics) {
    match event {
        FileEvent::Created(path) => match indexer.add_file(&path).await {
            Ok(report) => {
                metrics.file("add", true);
                metrics.phase("encrypt", report.encrypt.as_secs_f64());
                metrics.phase("index", report.index.as_secs_f64());
                metrics.words(report.words);
            }
            Err(e) => {
                metrics.file("add", false);
                error!(error = %e, retryable = e.is_retryable(), "indexing failed");
            }
        },
        FileEvent::Removed(path) => match indexer.remove_file(&path).await {
            Ok(report) => {
                metrics.file("remove", true);
                metrics.phase("remove", report.elapsed.as_secs_f64());
                metrics.words(report.words);
                if !report.found {
                    warn!("removed file was never indexed");
                }
            }
            Err(e) => {
                metrics.file("remove", false);
                error!(error = %e, retryable = e.is_retryable(), "retraction failed");
            }
        },
    }
}
