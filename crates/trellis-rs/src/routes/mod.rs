//! HTTP endpoint configuration for the gateway server.
//!
//! - [`proxy`] - the catch-all resource bound to the proxy engine
//! - [`health`] - health, readiness, and liveness probes
//! - [`metrics`] - endpoint and engine counters as JSON
//! - [`admission`] - route definition validation webhook

pub mod admission;
pub mod health;
pub mod metrics;
pub mod proxy;
