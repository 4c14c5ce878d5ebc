// Library exports for the binary and integration tests

// ===== Core proxy fleet =====
pub mod cors;
pub mod fleet;
pub mod forwarder;
pub mod listener;
pub mod request_log;
pub mod rules;

// ===== Control layer (rule storage and admin API) =====
pub mod admin_api;
pub mod config;
pub mod control;
pub mod store;

pub mod metrics;

pub use fleet::{FleetManager, FleetSnapshot, ReconcileError, ReconcileFailure, ReconcileReport};
pub use forwarder::{ForwardErrorKind, UpstreamForwarder};
pub use listener::{ListenerError, ListenerPool, ListenerState};
pub use request_log::{LogEntry, LogQuery, LogStats, RequestLog};
pub use rules::{CorsPolicy, ProxyRule, RuleError, RuleSet};
