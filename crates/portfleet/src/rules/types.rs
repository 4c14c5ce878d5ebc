//! Rule type definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upstream deadline when a rule does not set one
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of additional attempts after a transport failure
pub const DEFAULT_MAX_RETRIES: u32 = 0;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// CORS policy attached to a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Allowed origins, `*` allows any origin
    #[serde(default = "default_origins")]
    pub origins: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            origins: default_origins(),
        }
    }
}

/// A single local-port-to-upstream proxy mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRule {
    /// Opaque id, assigned by the control layer when left empty
    #[serde(default)]
    pub id: String,
    pub local_port: u16,
    pub target_url: String,
    #[serde(
        default,
        rename = "cors",
        alias = "corsPolicy",
        skip_serializing_if = "Option::is_none"
    )]
    pub cors: Option<CorsPolicy>,
    #[serde(default = "default_timeout_ms", rename = "timeout", alias = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(default, rename = "retries", alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProxyRule {
    /// Create an enabled rule with default policy
    pub fn new(id: impl Into<String>, local_port: u16, target_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_port,
            target_url: target_url.into(),
            cors: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            enabled: true,
        }
    }

    pub fn with_cors(mut self, origins: &[&str]) -> Self {
        self.cors = Some(CorsPolicy {
            enabled: true,
            origins: origins.iter().map(|o| o.to_string()).collect(),
        });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Upstream deadline for a single attempt
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the rule carries an enabled CORS policy
    pub fn cors_enabled(&self) -> bool {
        self.cors.as_ref().map(|c| c.enabled).unwrap_or(false)
    }

    /// Apply a partial update. The id is never changed.
    pub fn apply_patch(&mut self, patch: RulePatch) {
        if let Some(port) = patch.local_port {
            self.local_port = port;
        }
        if let Some(target) = patch.target_url {
            self.target_url = target;
        }
        if let Some(cors) = patch.cors {
            self.cors = Some(cors);
        }
        if let Some(timeout) = patch.timeout_ms {
            self.timeout_ms = timeout;
        }
        if let Some(retries) = patch.max_retries {
            self.max_retries = retries;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

/// Partial rule update sent by the control API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    #[serde(default)]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default, rename = "cors", alias = "corsPolicy")]
    pub cors: Option<CorsPolicy>,
    #[serde(default, rename = "timeout", alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "retries", alias = "maxRetries")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// The complete rule collection, as persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<ProxyRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }

    /// Rules that should be bound to a listener
    pub fn enabled(&self) -> impl Iterator<Item = &ProxyRule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    pub fn find(&self, id: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut ProxyRule> {
        self.rules.iter_mut().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl From<Vec<ProxyRule>> for RuleSet {
    fn from(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_defaults_from_minimal_json() {
        let json = r#"{"id": "a", "localPort": 3000, "targetUrl": "http://localhost:4000"}"#;
        let rule: ProxyRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(rule.max_retries, 0);
        assert!(rule.enabled);
        assert!(rule.cors.is_none());
        assert!(!rule.cors_enabled());
    }

    #[test]
    fn test_rule_file_format_keys() {
        let json = r#"{
            "id": "api",
            "localPort": 3000,
            "targetUrl": "https://api.example.com",
            "cors": {"enabled": true},
            "timeout": 5000,
            "retries": 2,
            "enabled": false
        }"#;
        let rule: ProxyRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.timeout_ms, 5000);
        assert_eq!(rule.max_retries, 2);
        assert!(!rule.enabled);
        // Missing origins means any origin
        assert_eq!(rule.cors.unwrap().origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_rule_long_key_aliases() {
        let json = r#"{
            "localPort": 3000,
            "targetUrl": "http://localhost:4000",
            "corsPolicy": {"enabled": true, "origins": ["http://a.com"]},
            "timeoutMs": 750,
            "maxRetries": 3
        }"#;
        let rule: ProxyRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, "");
        assert_eq!(rule.timeout_ms, 750);
        assert_eq!(rule.max_retries, 3);
        assert!(rule.cors_enabled());
    }

    #[test]
    fn test_rule_serializes_file_keys() {
        let rule = ProxyRule::new("x", 3000, "http://localhost:4000").with_timeout_ms(1000);
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["localPort"], 3000);
        assert_eq!(value["timeout"], 1000);
        assert_eq!(value["retries"], 0);
        assert!(value.get("cors").is_none());
    }

    #[test]
    fn test_apply_patch_keeps_id() {
        let mut rule = ProxyRule::new("keep-me", 3000, "http://localhost:4000");
        let patch: RulePatch =
            serde_json::from_str(r#"{"localPort": 3001, "retries": 1, "enabled": false}"#)
                .unwrap();
        rule.apply_patch(patch);
        assert_eq!(rule.id, "keep-me");
        assert_eq!(rule.local_port, 3001);
        assert_eq!(rule.max_retries, 1);
        assert!(!rule.enabled);
        assert_eq!(rule.target_url, "http://localhost:4000");
    }

    #[test]
    fn test_rule_set_enabled_filter() {
        let set = RuleSet::new(vec![
            ProxyRule::new("a", 3000, "http://localhost:4000"),
            ProxyRule::new("b", 3001, "http://localhost:4001").disabled(),
        ]);
        let enabled: Vec<_> = set.enabled().map(|r| r.id.as_str()).collect();
        assert_eq!(enabled, vec!["a"]);
        assert!(set.find("b").is_some());
        assert!(set.find("c").is_none());
    }
}
