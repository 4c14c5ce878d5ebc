//! Service configuration.
//!
//! Loaded from an optional YAML file, then overridden by CLI flags in
//! `main.rs`. Every field has a default, so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub proxy: ProxyListenConfig,
    /// JSON rule file (`{"rules": [...]}`)
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    /// Number of request log entries kept in memory
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default)]
    pub upstream: UpstreamClientConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            admin: AdminConfig::default(),
            proxy: ProxyListenConfig::default(),
            rules_path: default_rules_path(),
            log_capacity: default_log_capacity(),
            upstream: UpstreamClientConfig::default(),
        }
    }
}

/// Control API listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_host")]
    pub host: String,
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_admin_host(),
            port: default_admin_port(),
        }
    }
}

/// Where per-rule proxy listeners bind
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyListenConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
}

impl Default for ProxyListenConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
        }
    }
}

/// Upstream client pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamClientConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Optional connect timeout; the per-rule timeout always applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Accept self-signed upstream certificates
    #[serde(default = "default_tls_skip_verify")]
    pub tls_skip_verify: bool,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_secs: default_keepalive(),
            connect_timeout_ms: None,
            tls_skip_verify: default_tls_skip_verify(),
        }
    }
}

fn default_admin_host() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    8888
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("data/config.json")
}

fn default_log_capacity() -> usize {
    crate::request_log::DEFAULT_LOG_CAPACITY
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive() -> u64 {
    60
}

fn default_tls_skip_verify() -> bool {
    true
}

impl ServiceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.log_capacity == 0 {
            anyhow::bail!("log_capacity must be at least 1");
        }
        if self.admin.port == 0 {
            anyhow::bail!("admin.port must be between 1 and 65535");
        }
        self.admin_addr()?;
        if self.proxy.bind_host.trim().is_empty() {
            anyhow::bail!("proxy.bind_host must not be empty");
        }
        Ok(())
    }

    pub fn admin_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        let addr = format!("{}:{}", self.admin.host, self.admin.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid admin address '{addr}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: ServiceConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.admin.port, 8888);
        assert_eq!(config.proxy.bind_host, "0.0.0.0");
        assert_eq!(config.rules_path, PathBuf::from("data/config.json"));
        assert_eq!(config.log_capacity, 500);
        assert!(config.upstream.tls_skip_verify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
admin:
  host: 0.0.0.0
  port: 9999
proxy:
  bind_host: 127.0.0.1
rules_path: /tmp/rules.json
log_capacity: 50
upstream:
  max_idle_per_host: 4
  connect_timeout_ms: 250
  tls_skip_verify: false
"#;
        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.admin_addr().unwrap().port(), 9999);
        assert_eq!(config.proxy.bind_host, "127.0.0.1");
        assert_eq!(config.log_capacity, 50);
        assert_eq!(config.upstream.max_idle_per_host, 4);
        assert_eq!(config.upstream.connect_timeout_ms, Some(250));
        assert!(!config.upstream.tls_skip_verify);
        assert_eq!(config.upstream.pool_idle_timeout_secs, 90);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = ServiceConfig {
            log_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_admin_host() {
        let mut config = ServiceConfig::default();
        config.admin.host = "not a host".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_capacity: 10").unwrap();
        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_capacity, 10);
    }
}
