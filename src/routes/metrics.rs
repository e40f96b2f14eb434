use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the Prometheus recorder and register the analysis metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("analysis_jobs_submitted", "Analysis jobs created");
    metrics::describe_counter!("analysis_jobs_completed", "Analysis jobs completed");
    metrics::describe_counter!("analysis_jobs_failed", "Analysis jobs that failed");
    metrics::describe_counter!("analysis_jobs_cancelled", "Analysis jobs cancelled while queued");
    metrics::describe_gauge!("analysis_queue_depth", "Jobs waiting for dispatch");
    metrics::describe_gauge!("analysis_active_jobs", "Jobs currently in the pipeline");
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Time spent in the analysis pipeline per completed job"
    );

    Ok(Arc::new(handle))
}

/// GET /metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

pub fn metrics_router(handle: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(handle)
}
