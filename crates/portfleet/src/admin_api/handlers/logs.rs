//! Request log handlers.

use crate::admin_api::types::*;
use crate::control::RuleService;
use hyper::{Response, StatusCode};

/// GET /api/logs - Filtered, paged log entries plus aggregate stats
pub fn handle_list(query: Option<&str>, service: &RuleService) -> Response<AdminBody> {
    let query = match parse_log_query(query) {
        Ok(q) => q,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e, None),
    };

    let log = service.log();
    json_response(
        StatusCode::OK,
        &LogsResponse {
            logs: log.query(&query),
            stats: log.stats(),
        },
    )
}

/// DELETE /api/logs
pub fn handle_clear(service: &RuleService) -> Response<AdminBody> {
    service.log().clear();
    json_response(
        StatusCode::OK,
        &serde_json::json!({"success": true, "message": "Logs cleared"}),
    )
}
