//! HTTP API for health checks, Prometheus metrics and sample ingestion
//!
//! Samples arrive over HTTP from the metrics collaborator, get queued, and
//! the feeder loop drains the queue into the cluster state.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use recommender_lib::{
    ClusterState, ContainerId, PodId, RecommendationTarget, ResourceKind, SampleSource,
    UsageSample,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cluster: Arc<ClusterState>,
    pub samples_tx: mpsc::Sender<(ContainerId, UsageSample)>,
}

/// Sample source draining the ingest queue, driven by the feeder loop
pub struct QueuedSampleSource {
    rx: Mutex<mpsc::Receiver<(ContainerId, UsageSample)>>,
    batch_limit: usize,
}

impl QueuedSampleSource {
    pub fn new(rx: mpsc::Receiver<(ContainerId, UsageSample)>, batch_limit: usize) -> Self {
        Self {
            rx: Mutex::new(rx),
            batch_limit,
        }
    }
}

#[async_trait::async_trait]
impl SampleSource for QueuedSampleSource {
    async fn next_batch(&self) -> anyhow::Result<Vec<(ContainerId, UsageSample)>> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();
        while batch.len() < self.batch_limit {
            match rx.try_recv() {
                Ok(entry) => batch.push(entry),
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}

/// One ingested usage measurement
#[derive(Debug, Deserialize)]
pub struct IngestSample {
    pub namespace: String,
    pub pod_name: String,
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,
    pub container_name: String,
    pub measured_at: DateTime<Utc>,
    pub amount: f64,
    pub resource: ResourceKind,
}

/// A recommendation target registration
#[derive(Debug, Deserialize)]
pub struct IngestTarget {
    pub namespace: String,
    pub name: String,
    pub selector: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    containers_tracked: usize,
}

#[derive(Serialize)]
struct IngestResponse {
    accepted: usize,
}

/// Health check endpoint
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        containers_tracked: state.cluster.tracked_containers(),
    })
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Accept a batch of usage samples
async fn ingest_samples(
    State(state): State<Arc<AppState>>,
    Json(samples): Json<Vec<IngestSample>>,
) -> impl IntoResponse {
    let mut accepted = 0usize;
    for ingest in samples {
        let pod_id = PodId::new(ingest.namespace, ingest.pod_name);
        let container_id = ContainerId::new(pod_id.clone(), ingest.container_name);
        state.cluster.add_or_update_pod(pod_id, ingest.pod_labels);
        state.cluster.add_or_update_container(&container_id);

        let sample = UsageSample::new(ingest.measured_at, ingest.amount, ingest.resource);
        if state.samples_tx.send((container_id, sample)).await.is_err() {
            warn!("Sample queue closed, rejecting remaining samples");
            return (StatusCode::SERVICE_UNAVAILABLE, Json(IngestResponse { accepted }));
        }
        accepted += 1;
    }
    (StatusCode::ACCEPTED, Json(IngestResponse { accepted }))
}

/// Register or refresh a recommendation target
async fn register_target(
    State(state): State<Arc<AppState>>,
    Json(target): Json<IngestTarget>,
) -> impl IntoResponse {
    info!(namespace = %target.namespace, name = %target.name, "Registering target");
    state.cluster.add_or_update_target(RecommendationTarget {
        namespace: target.namespace,
        name: target.name,
        selector: target.selector,
    });
    StatusCode::NO_CONTENT
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/samples", post(ingest_samples))
        .route("/v1/targets", post(register_target))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
