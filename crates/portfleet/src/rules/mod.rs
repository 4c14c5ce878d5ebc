//! Proxy rule data model.
//!
//! A [`ProxyRule`] maps one local port to one upstream URL together with its
//! policy (CORS, timeout, retries, enabled flag). A [`RuleSet`] is the full
//! collection the fleet is reconciled against.
//!
//! The JSON shape matches the persisted rule file (`{"rules": [...]}`), using
//! `timeout`, `retries` and `cors` as keys. The longer names (`timeoutMs`,
//! `maxRetries`, `corsPolicy`) are accepted on input.

mod types;
mod validate;

pub use types::{
    CorsPolicy, ProxyRule, RulePatch, RuleSet, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS,
};
pub use validate::RuleError;
