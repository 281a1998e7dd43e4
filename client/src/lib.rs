//! Client-side entitlement resolution: protocol client, error taxonomy and
//! the single-flight caching orchestrator the UI reads status through.

pub mod api;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod status;
