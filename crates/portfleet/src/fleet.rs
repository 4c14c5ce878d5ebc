//! FleetManager - converges the running listeners onto a rule set.
//!
//! Every change to the rules triggers a full reconcile: the manager compares
//! the enabled rules against what is actually running, stops every listener
//! that is gone or changed, then starts every rule that is not already
//! running with an identical definition. Stops always precede starts, so a
//! rule that moves ports, or a port that changes hands, never has two
//! listeners at once.
//!
//! Reconciles are serialized. Readers see the fleet through
//! [`FleetSnapshot`]s published at the end of each reconcile.

use crate::config::ServiceConfig;
use crate::forwarder::UpstreamForwarder;
use crate::listener::{ListenerError, ListenerPool};
use crate::request_log::RequestLog;
use crate::rules::{ProxyRule, RuleError, RuleSet};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Immutable view of the fleet after a reconcile
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    /// Incremented by every reconcile
    pub generation: u64,
    pub listeners: BTreeMap<u16, Arc<ProxyRule>>,
}

impl FleetSnapshot {
    pub fn running_ports(&self) -> Vec<u16> {
        self.listeners.keys().copied().collect()
    }
}

/// Why a rule is not running after a reconcile
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// Rejected before reaching the pool
    #[error(transparent)]
    InvalidRule(#[from] RuleError),
}

/// A rule that could not be started
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub rule_id: String,
    pub port: u16,
    #[serde(rename = "error")]
    pub message: String,
    #[serde(skip)]
    pub error: ReconcileError,
}

impl ReconcileFailure {
    pub fn new(rule: &ProxyRule, error: impl Into<ReconcileError>) -> Self {
        let error = error.into();
        Self {
            rule_id: rule.id.clone(),
            port: rule.local_port,
            message: error.to_string(),
            error,
        }
    }
}

/// Result of one reconcile
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub generation: u64,
    pub stopped: Vec<u16>,
    pub started: Vec<u16>,
    pub unchanged: Vec<u16>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What a reconcile has to do, computed without touching any socket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Running ports that are gone, disabled or changed
    pub to_stop: Vec<u16>,
    /// Enabled rules not running with an identical definition
    pub to_start: Vec<Arc<ProxyRule>>,
    /// Running ports kept as they are
    pub unchanged: Vec<u16>,
    /// Enabled rules whose port was already claimed by an earlier rule
    pub conflicts: Vec<Arc<ProxyRule>>,
}

/// Diff the running listeners against the enabled rules of `rules`.
///
/// When two enabled rules claim the same port, the first one wins and the
/// others are returned as conflicts.
pub fn plan_reconcile(running: &BTreeMap<u16, Arc<ProxyRule>>, rules: &RuleSet) -> ReconcilePlan {
    let mut desired: BTreeMap<u16, &ProxyRule> = BTreeMap::new();
    let mut conflicts = Vec::new();
    for rule in rules.enabled() {
        match desired.entry(rule.local_port) {
            Entry::Vacant(slot) => {
                slot.insert(rule);
            }
            Entry::Occupied(_) => conflicts.push(Arc::new(rule.clone())),
        }
    }

    let mut plan = ReconcilePlan {
        conflicts,
        ..Default::default()
    };

    for (port, current) in running {
        match desired.get(port) {
            Some(wanted) if *wanted == current.as_ref() => plan.unchanged.push(*port),
            _ => plan.to_stop.push(*port),
        }
    }

    for (port, wanted) in desired {
        let identical = running
            .get(&port)
            .map(|current| current.as_ref() == wanted)
            .unwrap_or(false);
        if !identical {
            plan.to_start.push(Arc::new(wanted.clone()));
        }
    }

    plan
}

/// Owns the listener pool and keeps it in step with the rule set
pub struct FleetManager {
    pool: ListenerPool,
    reconcile_lock: Mutex<()>,
    snapshot: RwLock<Arc<FleetSnapshot>>,
}

impl FleetManager {
    pub fn new(pool: ListenerPool) -> Self {
        Self {
            pool,
            reconcile_lock: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(FleetSnapshot::default())),
        }
    }

    /// Build the pool, forwarder and request log from service config
    pub fn from_config(config: &ServiceConfig) -> Result<Self, anyhow::Error> {
        let forwarder = UpstreamForwarder::new(&config.upstream)?;
        let log = Arc::new(RequestLog::new(config.log_capacity));
        Ok(Self::new(ListenerPool::new(
            config.proxy.bind_host.clone(),
            forwarder,
            log,
        )))
    }

    pub fn log(&self) -> &Arc<RequestLog> {
        self.pool.log()
    }

    pub fn pool(&self) -> &ListenerPool {
        &self.pool
    }

    /// Latest published view of the fleet
    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn running_ports(&self) -> Vec<u16> {
        self.snapshot().running_ports()
    }

    /// Converge the running listeners onto `rules`.
    ///
    /// Failures are per rule: a port that cannot be bound is reported in the
    /// returned report and every other rule is still reconciled.
    pub async fn reconcile(&self, rules: &RuleSet) -> ReconcileReport {
        let _guard = self.reconcile_lock.lock().await;

        let plan = plan_reconcile(&self.pool.running(), rules);
        let mut report = ReconcileReport {
            unchanged: plan.unchanged,
            failures: plan
                .conflicts
                .iter()
                .map(|rule| {
                    ReconcileFailure::new(
                        rule,
                        ListenerError::PortUnavailable {
                            port: rule.local_port,
                            reason: "claimed by another enabled rule".to_string(),
                        },
                    )
                })
                .collect(),
            ..Default::default()
        };

        for port in plan.to_stop {
            if self.pool.stop(port).await {
                report.stopped.push(port);
            }
        }

        for rule in plan.to_start {
            match self.pool.start(Arc::clone(&rule)).await {
                Ok(_) => report.started.push(rule.local_port),
                Err(e) => report.failures.push(ReconcileFailure::new(&rule, e)),
            }
        }

        report.generation = self.publish();

        for failure in &report.failures {
            warn!(
                "Rule '{}' on port {} not started: {}",
                failure.rule_id, failure.port, failure.message
            );
        }
        info!(
            "Reconciled fleet (generation {}): {} started, {} stopped, {} unchanged, {} failed",
            report.generation,
            report.started.len(),
            report.stopped.len(),
            report.unchanged.len(),
            report.failures.len()
        );
        report
    }

    /// Stop every listener
    pub async fn shutdown(&self) {
        let _guard = self.reconcile_lock.lock().await;
        self.pool.stop_all().await;
        self.publish();
        info!("All proxies stopped");
    }

    fn publish(&self) -> u64 {
        let mut snapshot = self.snapshot.write();
        let generation = snapshot.generation + 1;
        *snapshot = Arc::new(FleetSnapshot {
            generation,
            listeners: self.pool.running(),
        });
        generation
    }
}
