//! Rule CRUD handlers.

use crate::admin_api::types::*;
use crate::control::RuleService;
use crate::rules::{ProxyRule, RulePatch};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use tracing::info;

/// GET /api/config - Current rule set
pub async fn handle_get_config(service: &RuleService) -> Response<AdminBody> {
    json_response(StatusCode::OK, &service.rules().await)
}

/// POST /api/config - Replace every rule
pub async fn handle_replace(req: Request<Incoming>, service: &RuleService) -> Response<AdminBody> {
    let body: ReplaceRulesRequest = match read_json(req, "rules").await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match service.replace_rules(body.rules).await {
        Ok(report) => json_response(StatusCode::OK, &SuccessResponse::new("Config saved", report)),
        Err(e) => control_error_response(e),
    }
}

/// POST /api/config/rules - Add a rule
pub async fn handle_add(req: Request<Incoming>, service: &RuleService) -> Response<AdminBody> {
    let rule: ProxyRule = match read_json(req, "rule").await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match service.add_rule(rule).await {
        Ok((rule, report)) => {
            info!("Admin API added rule '{}'", rule.id);
            json_response(
                StatusCode::OK,
                &RuleResponse {
                    success: true,
                    rule,
                    failures: report.failures,
                },
            )
        }
        Err(e) => control_error_response(e),
    }
}

/// PUT /api/config/rules/:id - Partial update
pub async fn handle_update(
    id: &str,
    req: Request<Incoming>,
    service: &RuleService,
) -> Response<AdminBody> {
    let patch: RulePatch = match read_json(req, "rule").await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match service.update_rule(id, patch).await {
        Ok((_, report)) => json_response(StatusCode::OK, &SuccessResponse::new("Rule updated", report)),
        Err(e) => control_error_response(e),
    }
}

/// DELETE /api/config/rules/:id
pub async fn handle_delete(id: &str, service: &RuleService) -> Response<AdminBody> {
    match service.delete_rule(id).await {
        Ok(report) => json_response(StatusCode::OK, &SuccessResponse::new("Rule deleted", report)),
        Err(e) => control_error_response(e),
    }
}
