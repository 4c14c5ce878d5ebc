//! Structural validation of rules, applied at the control-layer boundary.

use super::types::{ProxyRule, RuleSet};
use hyper::Uri;
use std::collections::{HashMap, HashSet};

/// Rule validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid rule '{id}': {reason}")]
    InvalidRuleConfig { id: String, reason: String },
    #[error("Port {port} is used by more than one enabled rule ('{first}' and '{second}')")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },
}

impl RuleError {
    fn invalid(rule: &ProxyRule, reason: impl Into<String>) -> Self {
        RuleError::InvalidRuleConfig {
            id: rule.id.clone(),
            reason: reason.into(),
        }
    }
}

impl ProxyRule {
    /// Parse `target_url` into an absolute http(s) URI
    pub fn target_uri(&self) -> Result<Uri, RuleError> {
        if self.target_url.trim().is_empty() {
            return Err(RuleError::invalid(self, "targetUrl is required"));
        }
        let uri: Uri = self
            .target_url
            .parse()
            .map_err(|e| RuleError::invalid(self, format!("targetUrl is not a valid URL: {e}")))?;

        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            Some(other) => {
                return Err(RuleError::invalid(
                    self,
                    format!("unsupported targetUrl scheme '{other}', expected http or https"),
                ))
            }
            None => return Err(RuleError::invalid(self, "targetUrl must include a scheme")),
        }
        if uri.authority().is_none() {
            return Err(RuleError::invalid(self, "targetUrl must include a host"));
        }
        Ok(uri)
    }

    /// Validate a single rule
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.id.trim().is_empty() {
            return Err(RuleError::invalid(self, "id is required"));
        }
        if self.local_port == 0 {
            return Err(RuleError::invalid(self, "localPort must be between 1 and 65535"));
        }
        if self.timeout_ms == 0 {
            return Err(RuleError::invalid(self, "timeout must be a positive number of milliseconds"));
        }
        self.target_uri()?;
        Ok(())
    }
}

impl RuleSet {
    /// Validate every rule plus the unique-port invariant among enabled rules
    pub fn validate(&self) -> Result<(), RuleError> {
        let mut ids: HashSet<&str> = HashSet::new();
        let mut ports: HashMap<u16, &str> = HashMap::new();

        for rule in &self.rules {
            rule.validate()?;
            if !ids.insert(rule.id.as_str()) {
                return Err(RuleError::invalid(rule, "duplicate rule id"));
            }
            if !rule.enabled {
                continue;
            }
            if let Some(first) = ports.insert(rule.local_port, rule.id.as_str()) {
                return Err(RuleError::DuplicatePort {
                    port: rule.local_port,
                    first: first.to_string(),
                    second: rule.id.clone(),
                });
            }
        }
        Ok(())
    }
}
