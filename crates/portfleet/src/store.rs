//! Rule persistence.
//!
//! Rules are stored as a single JSON document, `{"rules": [...]}`. The
//! [`RuleStore`] trait lets the control layer run against something other
//! than a file, which the tests use through [`MemoryStore`].

use crate::rules::RuleSet;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rule store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write rules to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode rules: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Backend-agnostic rule storage
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load the persisted rules. A store with nothing in it yields an empty set.
    async fn load_rules(&self) -> Result<RuleSet, StoreError>;

    /// Replace the persisted rules with `rules`
    async fn persist(&self, rules: &RuleSet) -> Result<(), StoreError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl RuleStore for JsonFileStore {
    async fn load_rules(&self) -> Result<RuleSet, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Rule file {:?} does not exist, starting with no rules", self.path);
                return Ok(RuleSet::default());
            }
            Err(e) => {
                warn!("Failed to read rule file {:?}, using no rules: {}", self.path, e);
                return Ok(RuleSet::default());
            }
        };

        match serde_json::from_str::<RuleSet>(&contents) {
            Ok(rules) => {
                info!("Loaded {} rules from {:?}", rules.len(), self.path);
                Ok(rules)
            }
            Err(e) => {
                warn!("Failed to parse rule file {:?}, using no rules: {}", self.path, e);
                Ok(RuleSet::default())
            }
        }
    }

    async fn persist(&self, rules: &RuleSet) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(rules)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        // Write next to the target and rename so readers never see a torn file
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!("Saved {} rules to {:?}", rules.len(), self.path);
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    rules: RwLock<RuleSet>,
    writes: RwLock<usize>,
}

impl MemoryStore {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: RwLock::new(rules),
            writes: RwLock::new(0),
        }
    }

    pub fn current(&self) -> RuleSet {
        self.rules.read().clone()
    }

    /// Number of `persist` calls so far
    pub fn writes(&self) -> usize {
        *self.writes.read()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn load_rules(&self) -> Result<RuleSet, StoreError> {
        Ok(self.current())
    }

    async fn persist(&self, rules: &RuleSet) -> Result<(), StoreError> {
        *self.rules.write() = rules.clone();
        *self.writes.write() += 1;
        Ok(())
    }
}
