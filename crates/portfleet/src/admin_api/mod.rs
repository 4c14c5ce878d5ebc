//! Admin REST API for rule and log management.
//!
//! This module provides a JSON API for:
//! - Reading and replacing the rule set
//! - Adding, updating and deleting single rules
//! - Querying and clearing the request log
//! - Fleet status, health and metrics endpoints
//!
//! The API listens on a configurable address (default: 127.0.0.1:8888).

mod handlers;
mod router;
mod server;
mod types;

pub use router::route_request;
pub use server::AdminApiServer;
