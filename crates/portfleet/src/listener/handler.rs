//! Per-request handling for proxy listeners.
//!
//! Order of operations: CORS decision, OPTIONS short-circuit, forward,
//! translate the outcome, log.

use super::body::{LoggedBody, PendingEntry};
use crate::cors::{apply_cors, CorsHeaders};
use crate::forwarder::{strip_hop_by_hop, ForwardError, ForwardRequest, UpstreamForwarder};
use crate::metrics;
use crate::request_log::{LogEntry, LogOutcome, RequestLog};
use crate::rules::ProxyRule;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE, ORIGIN};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Body type of every proxy listener response
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Everything one listener needs to serve requests
pub struct ListenerContext {
    pub rule: Arc<ProxyRule>,
    pub forwarder: UpstreamForwarder,
    pub log: Arc<RequestLog>,
}

/// JSON body returned when the upstream cannot be reached
#[derive(Debug, Serialize)]
pub struct BadGatewayBody<'a> {
    pub error: &'static str,
    pub message: &'a str,
    pub target: &'a str,
    pub path: &'a str,
}

fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn json_error(status: StatusCode, body: &impl Serialize) -> Response<ProxyBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// HTTP 502 for a request whose attempts were all spent
pub fn bad_gateway(error: &ForwardError, target: &str, path: &str) -> Response<ProxyBody> {
    json_error(
        StatusCode::BAD_GATEWAY,
        &BadGatewayBody {
            error: "Bad Gateway",
            message: &error.message,
            target,
            path,
        },
    )
}

fn with_cors(mut response: Response<ProxyBody>, cors: Option<&CorsHeaders>) -> Response<ProxyBody> {
    if let Some(cors) = cors {
        cors.apply_to(response.headers_mut());
    }
    response
}

/// Handle one inbound request on a proxy listener
pub async fn handle_proxy_request(
    req: Request<Incoming>,
    ctx: Arc<ListenerContext>,
) -> Result<Response<ProxyBody>, Infallible> {
    let started = Instant::now();
    let rule = &ctx.rule;
    let port = rule.local_port;

    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let cors = apply_cors(rule.cors.as_ref(), origin.as_deref());

    if rule.cors_enabled() && req.method() == Method::OPTIONS {
        debug!("[{}] Answering preflight for {}", port, req.uri());
        return Ok(with_cors(Response::new(empty_body()), cors.as_ref()));
    }

    let (parts, body) = req.into_parts();
    let method = parts.method.to_string();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let message = format!("failed to read request body: {e}");
            warn!("[{}] {} {}: {}", port, method, path, message);
            metrics::record_failed(port, "client_body", started.elapsed().as_secs_f64() * 1000.0);
            ctx.log.append(LogEntry::new(
                port,
                &method,
                &path,
                &rule.target_url,
                started.elapsed(),
                LogOutcome::Failed {
                    error_message: message.clone(),
                },
            ));
            let response = json_error(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "error": "Bad Request", "message": message, "path": path }),
            );
            return Ok(with_cors(response, cors.as_ref()));
        }
    };

    let request = ForwardRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };

    let response = match ctx.forwarder.forward(&request, rule).await {
        Ok(upstream) => {
            let (mut upstream_parts, upstream_body) = upstream.into_parts();
            strip_hop_by_hop(&mut upstream_parts.headers);
            let pending = PendingEntry {
                log: Arc::clone(&ctx.log),
                port,
                method,
                path,
                target_url: rule.target_url.clone(),
                started,
                status: upstream_parts.status.as_u16(),
            };
            let body = LoggedBody::new(upstream_body.boxed(), pending).boxed();
            Response::from_parts(upstream_parts, body)
        }
        Err(error) => {
            let elapsed = started.elapsed();
            warn!(
                "[{}] Proxy error after {} attempt(s): {} {} -> {}: {}",
                port, error.attempts, method, path, rule.target_url, error.message
            );
            metrics::record_failed(port, error.kind.as_str(), elapsed.as_secs_f64() * 1000.0);
            ctx.log.append(LogEntry::new(
                port,
                &method,
                &path,
                &rule.target_url,
                elapsed,
                LogOutcome::Failed {
                    error_message: error.message.clone(),
                },
            ));
            bad_gateway(&error, &rule.target_url, &path)
        }
    };

    Ok(with_cors(response, cors.as_ref()))
}
