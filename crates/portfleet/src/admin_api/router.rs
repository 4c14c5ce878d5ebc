//! Route dispatch logic for the Admin API.

use crate::admin_api::handlers::{logs, rules, system};
use crate::admin_api::types::{not_found, AdminBody};
use crate::control::RuleService;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    service: Arc<RuleService>,
) -> Result<Response<AdminBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("Admin API: {} {}", method, path);

    let response = route_by_path(&method, &path, query.as_deref(), req, service).await;
    Ok(response)
}

async fn route_by_path(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    service: Arc<RuleService>,
) -> Response<AdminBody> {
    let path = path.trim_end_matches('/');

    match (method, path) {
        (&Method::GET, "/health") => return system::handle_health(),
        (&Method::GET, "/metrics") => return system::handle_metrics(),
        (&Method::GET, "/api/status") => return system::handle_status(&service),

        (&Method::GET, "/api/config") => return rules::handle_get_config(&service).await,
        (&Method::POST, "/api/config") => return rules::handle_replace(req, &service).await,
        (&Method::POST, "/api/config/rules") => return rules::handle_add(req, &service).await,

        (&Method::GET, "/api/logs") => return logs::handle_list(query, &service),
        (&Method::DELETE, "/api/logs") => return logs::handle_clear(&service),
        _ => {}
    }

    // Single rule routes
    if let Some(id) = path.strip_prefix("/api/config/rules/") {
        if id.is_empty() || id.contains('/') {
            return not_found();
        }
        let id = urlencoding::decode(id)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| id.to_string());
        return match *method {
            Method::PUT => rules::handle_update(&id, req, &service).await,
            Method::DELETE => rules::handle_delete(&id, &service).await,
            _ => not_found(),
        };
    }

    not_found()
}
