//! Control layer: the single writer of the rule set.
//!
//! [`RuleService`] serializes every mutation behind one async mutex so that
//! validate, port probe, persist and reconcile happen as one step. The admin
//! API is a thin HTTP skin over it.

use crate::fleet::{FleetManager, ReconcileFailure, ReconcileReport};
use crate::listener::{create_listener, resolve_bind_addr};
use crate::request_log::RequestLog;
use crate::rules::{ProxyRule, RuleError, RulePatch, RuleSet};
use crate::store::{RuleStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Control layer errors
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Invalid(#[from] RuleError),
    #[error("Port {port} is unavailable")]
    PortUnavailable { port: u16, details: String },
    #[error("Rule '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a port availability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCheck {
    pub available: bool,
    pub details: String,
}

/// Try to bind `host:port` and release it straight away
pub fn probe_port(host: &str, port: u16) -> PortCheck {
    let Some(addr) = resolve_bind_addr(host, port) else {
        return PortCheck {
            available: false,
            details: format!("Port {port} check failed: cannot resolve bind host '{host}'"),
        };
    };
    match create_listener(addr) {
        Ok(listener) => {
            drop(listener);
            PortCheck {
                available: true,
                details: format!("Port {port} is available"),
            }
        }
        Err(e) => PortCheck {
            available: false,
            details: format!("Port {port} is in use: {e}"),
        },
    }
}

pub struct RuleService {
    rules: Mutex<RuleSet>,
    store: Arc<dyn RuleStore>,
    fleet: Arc<FleetManager>,
}

impl RuleService {
    pub fn new(store: Arc<dyn RuleStore>, fleet: Arc<FleetManager>) -> Self {
        Self {
            rules: Mutex::new(RuleSet::default()),
            store,
            fleet,
        }
    }

    pub fn fleet(&self) -> &Arc<FleetManager> {
        &self.fleet
    }

    pub fn log(&self) -> &Arc<RequestLog> {
        self.fleet.log()
    }

    /// Load the stored rules and bring the fleet up.
    ///
    /// Stored rules are not rejected as a whole when one of them is invalid.
    /// Invalid rules stay stored but never reach the fleet; the report lists
    /// them as failures next to any rule that could not bind.
    pub async fn initialize(&self) -> Result<ReconcileReport, ControlError> {
        let mut rules = self.rules.lock().await;
        let mut loaded = self.store.load_rules().await?;
        if assign_missing_ids(&mut loaded) {
            self.store.persist(&loaded).await?;
        }
        if let Err(e) = loaded.validate() {
            warn!("Stored rules are not fully valid: {}", e);
        }

        let report = self.reconcile_valid(&loaded).await;
        *rules = loaded;
        Ok(report)
    }

    /// Current rule set
    pub async fn rules(&self) -> RuleSet {
        self.rules.lock().await.clone()
    }

    /// Replace the whole rule set
    pub async fn replace_rules(&self, new_rules: Vec<ProxyRule>) -> Result<ReconcileReport, ControlError> {
        let mut rules = self.rules.lock().await;
        let mut candidate = RuleSet::new(new_rules);
        assign_missing_ids(&mut candidate);
        candidate.validate()?;

        let report = self.commit(&mut rules, candidate).await?;
        info!("Rule set replaced ({} rules)", rules.len());
        Ok(report)
    }

    /// Add a rule. An empty id is replaced by a generated one.
    pub async fn add_rule(&self, mut rule: ProxyRule) -> Result<(ProxyRule, ReconcileReport), ControlError> {
        let mut rules = self.rules.lock().await;
        if rule.id.trim().is_empty() {
            rule.id = new_rule_id();
        }

        let mut candidate = rules.clone();
        candidate.rules.push(rule.clone());
        candidate.validate()?;
        if rule.enabled {
            self.check_port(&rule.id, rule.local_port)?;
        }

        let report = self.commit(&mut rules, candidate).await?;
        info!("Rule '{}' added on port {}", rule.id, rule.local_port);
        Ok((rule, report))
    }

    /// Merge `patch` into the rule with `id`
    pub async fn update_rule(
        &self,
        id: &str,
        patch: RulePatch,
    ) -> Result<(ProxyRule, ReconcileReport), ControlError> {
        let mut rules = self.rules.lock().await;
        let mut candidate = rules.clone();
        let rule = candidate
            .find_mut(id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;
        let (old_port, was_enabled) = (rule.local_port, rule.enabled);
        rule.apply_patch(patch);
        let updated = rule.clone();
        candidate.validate()?;
        // Only a move or a re-enable claims a new port
        if updated.enabled && (updated.local_port != old_port || !was_enabled) {
            self.check_port(&updated.id, updated.local_port)?;
        }

        let report = self.commit(&mut rules, candidate).await?;
        info!("Rule '{}' updated", id);
        Ok((updated, report))
    }

    pub async fn delete_rule(&self, id: &str) -> Result<ReconcileReport, ControlError> {
        let mut rules = self.rules.lock().await;
        if rules.find(id).is_none() {
            return Err(ControlError::NotFound(id.to_string()));
        }
        let mut candidate = rules.clone();
        candidate.rules.retain(|r| r.id != id);

        let report = self.commit(&mut rules, candidate).await?;
        info!("Rule '{}' deleted", id);
        Ok(report)
    }

    pub fn running_ports(&self) -> Vec<u16> {
        self.fleet.running_ports()
    }

    /// Stop every listener; the stored rules are left untouched
    pub async fn shutdown(&self) {
        let _rules = self.rules.lock().await;
        self.fleet.shutdown().await;
    }

    /// A port is free for `rule_id` if nothing holds it, or if this fleet
    /// already serves that same rule on it
    fn check_port(&self, rule_id: &str, port: u16) -> Result<(), ControlError> {
        let owned = self
            .fleet
            .snapshot()
            .listeners
            .get(&port)
            .map(|r| r.id == rule_id)
            .unwrap_or(false);
        if owned {
            return Ok(());
        }

        let check = probe_port(self.fleet.pool().bind_host(), port);
        if check.available {
            Ok(())
        } else {
            Err(ControlError::PortUnavailable {
                port,
                details: check.details,
            })
        }
    }

    async fn commit(&self, current: &mut RuleSet, candidate: RuleSet) -> Result<ReconcileReport, ControlError> {
        self.store.persist(&candidate).await?;
        let report = self.reconcile_valid(&candidate).await;
        *current = candidate;
        Ok(report)
    }

    /// Reconcile the fleet against the rules that pass validation on their
    /// own. Enabled rules that fail are reported instead of started.
    async fn reconcile_valid(&self, rules: &RuleSet) -> ReconcileReport {
        let mut rejected = Vec::new();
        let valid: Vec<ProxyRule> = rules
            .rules
            .iter()
            .filter(|rule| match rule.validate() {
                Ok(()) => true,
                Err(e) => {
                    if rule.enabled {
                        warn!("Rule '{}' not started: {}", rule.id, e);
                        rejected.push(ReconcileFailure::new(rule, e));
                    }
                    false
                }
            })
            .cloned()
            .collect();

        let mut report = self.fleet.reconcile(&RuleSet::new(valid)).await;
        rejected.append(&mut report.failures);
        report.failures = rejected;
        report
    }
}

fn new_rule_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Give every rule without an id a fresh one. Returns whether any changed.
fn assign_missing_ids(rules: &mut RuleSet) -> bool {
    let mut changed = false;
    for rule in rules.rules.iter_mut().filter(|r| r.id.trim().is_empty()) {
        rule.id = new_rule_id();
        changed = true;
    }
    changed
}
