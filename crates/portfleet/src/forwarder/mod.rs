//! Upstream forwarding with timeout and bounded retry.
//!
//! [`UpstreamForwarder::forward`] sends one buffered request to a rule's
//! target. Every attempt is bounded by the rule's timeout, which covers
//! connecting and receiving the response header. Transport failures are
//! retried up to `max_retries` more times; any HTTP response, whatever its
//! status, ends the loop. The response body is handed back unread, so body
//! errors happen after this function returns and are never retried.

mod client;
mod outcome;
mod tls;

pub use client::{create_http_client, HttpClient};
pub use outcome::{ForwardError, ForwardErrorKind, ForwardRequest, Outcome};

use crate::config::UpstreamClientConfig;
use crate::metrics;
use crate::rules::ProxyRule;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, HOST};
use hyper::{HeaderMap, Request, Uri};
use std::error::Error as StdError;
use tracing::{debug, warn};

/// Hop-by-hop headers, never copied between connections
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Forwards requests to rule targets over a shared pooled client
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: HttpClient,
}

impl UpstreamForwarder {
    pub fn new(config: &UpstreamClientConfig) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_http_client(config)?,
        })
    }

    pub fn with_client(client: HttpClient) -> Self {
        Self { client }
    }

    /// Forward `request` to `rule.target_url`, retrying transport failures.
    pub async fn forward(&self, request: &ForwardRequest, rule: &ProxyRule) -> Outcome {
        let target = rule
            .target_uri()
            .map_err(|e| ForwardError::new(ForwardErrorKind::InvalidRequest, e.to_string()))?;
        let max_attempts = rule.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let upstream_req = build_upstream_request(request, &target).map_err(|mut e| {
                e.attempts = attempt;
                e
            })?;

            debug!(
                "[{}] {} {} -> {} (attempt {}/{})",
                rule.local_port,
                request.method,
                request.path_and_query(),
                upstream_req.uri(),
                attempt,
                max_attempts
            );

            let error = match tokio::time::timeout(rule.timeout(), self.client.request(upstream_req))
                .await
            {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => classify_client_error(&e),
                Err(_) => ForwardError::new(
                    ForwardErrorKind::Timeout,
                    format!("upstream did not respond within {}ms", rule.timeout_ms),
                ),
            };

            if attempt >= max_attempts || !error.kind.is_retryable() {
                return Err(ForwardError { attempts: attempt, ..error });
            }

            warn!(
                "[{}] Upstream {} failed ({}): {}; retry {}/{}",
                rule.local_port,
                rule.target_url,
                error.kind,
                error.message,
                attempt,
                rule.max_retries
            );
            metrics::record_retry(rule.local_port);
        }
    }
}

/// Build the upstream URI: target scheme and authority, target path prefix,
/// then the inbound path and query.
pub fn upstream_uri(target: &Uri, path_and_query: &str) -> Result<Uri, ForwardError> {
    let scheme = target.scheme_str().unwrap_or("http");
    let authority = target
        .authority()
        .map(|a| a.as_str())
        .ok_or_else(|| ForwardError::new(ForwardErrorKind::InvalidRequest, "target has no host"))?;
    let prefix = target.path().trim_end_matches('/');

    format!("{scheme}://{authority}{prefix}{path_and_query}")
        .parse()
        .map_err(|e| {
            ForwardError::new(
                ForwardErrorKind::InvalidRequest,
                format!("invalid upstream URI: {e}"),
            )
        })
}

fn build_upstream_request(
    request: &ForwardRequest,
    target: &Uri,
) -> Result<Request<Full<Bytes>>, ForwardError> {
    let uri = upstream_uri(target, request.path_and_query())?;

    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    // Body is buffered; the client sets the length from it
    headers.remove(hyper::header::CONTENT_LENGTH);

    let host = target
        .authority()
        .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        .ok_or_else(|| ForwardError::new(ForwardErrorKind::InvalidRequest, "target has no host"))?;
    headers.insert(HOST, host);

    let mut builder = Request::builder().method(request.method.clone()).uri(uri);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    builder
        .body(Full::new(request.body.clone()))
        .map_err(|e| ForwardError::new(ForwardErrorKind::InvalidRequest, e.to_string()))
}

fn classify_client_error(error: &hyper_util::client::legacy::Error) -> ForwardError {
    let kind = if error.is_connect() {
        ForwardErrorKind::Unreachable
    } else {
        ForwardErrorKind::Reset
    };
    ForwardError::new(kind, error_chain(error))
}

/// Flatten an error and its sources into one line
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
