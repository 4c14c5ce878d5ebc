//! Request/response types and helpers for the Admin API.

use crate::control::ControlError;
use crate::fleet::{ReconcileFailure, ReconcileReport};
use crate::request_log::{LogEntry, LogQuery, LogStats};
use crate::rules::ProxyRule;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

pub type AdminBody = Full<Bytes>;

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Acknowledgement for mutations that return no resource
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
    /// Rules the fleet could not start after this change
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReconcileFailure>,
}

impl SuccessResponse {
    pub fn new(message: &str, report: ReconcileReport) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            failures: report.failures,
        }
    }
}

/// Response for a created or updated rule
#[derive(Debug, Serialize)]
pub struct RuleResponse {
    pub success: bool,
    pub rule: ProxyRule,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReconcileFailure>,
}

/// Body of `POST /api/config`
#[derive(Debug, Deserialize)]
pub struct ReplaceRulesRequest {
    pub rules: Vec<ProxyRule>,
}

/// Response for `GET /api/logs`
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
    pub stats: LogStats,
}

/// Response for `GET /api/status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub running_ports: Vec<u16>,
    pub stats: LogStats,
}

/// Parse `limit`, `offset`, `port` and `statusCode` from a query string.
///
/// Unknown parameters are ignored. A malformed number is an error naming
/// the parameter.
pub fn parse_log_query(query: Option<&str>) -> Result<LogQuery, String> {
    let mut parsed = LogQuery::default();
    let Some(query) = query else {
        return Ok(parsed);
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value).map_err(|_| format!("Invalid {key} parameter"))?;
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key {
            "limit" => parsed.limit = parse_param(key, value)?,
            "offset" => parsed.offset = parse_param(key, value)?,
            "port" => parsed.port = Some(parse_param(key, value)?),
            "statusCode" => parsed.status_code = Some(parse_param(key, value)?),
            _ => {}
        }
    }
    Ok(parsed)
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {key} parameter: '{value}'"))
}

// =============================================================================
// Response helper functions
// =============================================================================

/// Create a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<AdminBody> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// Build an HTTP response with headers, falling back to a bare response if
/// the builder rejects the input
pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<AdminBody> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Create an error response
pub fn error_response(status: StatusCode, error: &str, details: Option<String>) -> Response<AdminBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            details,
        },
    )
}

/// Create a not found response
pub fn not_found() -> Response<AdminBody> {
    error_response(StatusCode::NOT_FOUND, "Not Found", None)
}

/// Translate a control layer error
pub fn control_error_response(err: ControlError) -> Response<AdminBody> {
    match err {
        ControlError::Invalid(e) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid rule", Some(e.to_string()))
        }
        ControlError::PortUnavailable { details, .. } => {
            error_response(StatusCode::BAD_REQUEST, "Port unavailable", Some(details))
        }
        ControlError::NotFound(id) => error_response(
            StatusCode::NOT_FOUND,
            "Rule not found",
            Some(format!("No rule with id '{id}'")),
        ),
        ControlError::Store(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to save rules",
            Some(e.to_string()),
        ),
    }
}

/// Collect request body into bytes
pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    use http_body_util::BodyExt;
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}

/// Collect and decode a JSON request body, or produce the 400 to send back
pub async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
    what: &str,
) -> Result<T, Response<AdminBody>> {
    let body = collect_body(req)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e, None))?;
    serde_json::from_slice(&body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid {what} format"),
            Some(e.to_string()),
        )
    })
}
