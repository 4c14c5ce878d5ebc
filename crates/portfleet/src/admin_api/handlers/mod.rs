//! Admin API request handlers.

pub mod logs;
pub mod rules;
pub mod system;
