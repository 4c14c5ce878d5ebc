//! System handlers: health, metrics, status.

use crate::admin_api::types::*;
use crate::control::RuleService;
use crate::metrics::collect_metrics;
use hyper::{Response, StatusCode};

/// GET /health - Health check
pub fn handle_health() -> Response<AdminBody> {
    json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}))
}

/// GET /metrics - Prometheus metrics
pub fn handle_metrics() -> Response<AdminBody> {
    build_response_with_headers(
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        collect_metrics(),
    )
}

/// GET /api/status - Running ports and log stats
pub fn handle_status(service: &RuleService) -> Response<AdminBody> {
    json_response(
        StatusCode::OK,
        &StatusResponse {
            running_ports: service.running_ports(),
            stats: service.log().stats(),
        },
    )
}
