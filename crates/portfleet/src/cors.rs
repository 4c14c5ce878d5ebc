//! CORS header injection for proxied responses.
//!
//! [`apply_cors`] is a pure function of the rule's policy and the request's
//! `Origin`. It returns the headers to add, or `None` when the listener must
//! not grant cross-origin access.

use crate::rules::CorsPolicy;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization, *";

/// Wildcard entry in a policy's origin list
const ANY_ORIGIN: &str = "*";

/// Headers granting one origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsHeaders {
    pub allow_origin: String,
}

impl CorsHeaders {
    /// Insert the CORS headers, replacing any the upstream sent
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        let origin = HeaderValue::from_str(&self.allow_origin)
            .unwrap_or_else(|_| HeaderValue::from_static(ANY_ORIGIN));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

/// Decide which CORS headers, if any, a response gets.
///
/// A wildcard policy echoes the request origin (or `*` when the request has
/// none); an exact match returns the matched origin literally.
pub fn apply_cors(policy: Option<&CorsPolicy>, request_origin: Option<&str>) -> Option<CorsHeaders> {
    let policy = policy.filter(|p| p.enabled)?;

    if policy.origins.iter().any(|o| o == ANY_ORIGIN) {
        return Some(CorsHeaders {
            allow_origin: request_origin.unwrap_or(ANY_ORIGIN).to_string(),
        });
    }

    let origin = request_origin?;
    policy
        .origins
        .iter()
        .find(|allowed| allowed.as_str() == origin)
        .map(|allowed| CorsHeaders {
            allow_origin: allowed.clone(),
        })
}
