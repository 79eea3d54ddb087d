//! Prometheus metrics endpoint.
//!
//! Renders everything recorded through the `metrics` facade, which for the
//! orchestrator means the workflow lifecycle counters
//! (`workflow_started_total`, `workflow_completed_total`,
//! `workflow_failed_total`) and the reverse-path counters
//! (`compensation_started_total`, `compensation_step_failed_total`,
//! `compensation_finished_total`).

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus text exposition format, version 0.0.4.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics — Prometheus scrape endpoint.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
}
