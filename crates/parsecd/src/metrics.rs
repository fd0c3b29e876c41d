//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics: Prometheus text format
//!   GET /healthz: Liveness probe (always 200 if process is running)
//!   GET /readyz: Readiness probe (200 once the table store holds an index)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use std::sync::Arc;

type Labels = Vec<(String, String)>;

/// Per-file indexing metrics, cheap to clone into worker tasks.
#[derive(Clone)]
pub struct IndexMetrics {
    files: Family<Labels, Counter>,
    duration: Family<Labels, Histogram>,
    words: Counter,
}

impl IndexMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let files = Family::default();
        let duration = Family::<Labels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])
        });
        let words = Counter::default();

        registry.register(
            "parsec_files_indexed",
            "Files processed by the daemon, by operation and outcome",
            files.clone(),
        );
        registry.register(
            "parsec_file_duration_seconds",
            "Time spent per file in each phase",
            duration.clone(),
        );
        registry.register(
            "parsec_words_indexed",
            "Word postings written (additions and retractions)",
            words.clone(),
        );

        Self {
            files,
            duration,
            words,
        }
    }

    pub fn file(&self, op: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.files
            .get_or_create(&vec![
                ("op".to_string(), op.to_string()),
                ("outcome".to_string(), outcome.to_string()),
            ])
            .inc();
    }

    pub fn phase(&self, phase: &str, seconds: f64) {
        self.duration
            .get_or_create(&vec![("phase".to_string(), phase.to_string())])
            .observe(seconds);
    }

    pub fn words(&self, n: usize) {
        self.words.inc_by(n as u64);
    }
}

/// Shared state of the HTTP endpoints
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub operator: opendal::Operator,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve metrics and health endpoints on `addr` (e.g. "127.0.0.1:9184")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 once the table store answers with an
/// initialised index, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match parsec_storage::check_health(&state.operator).await {
        Ok(()) => (StatusCode::OK, "ready".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}
