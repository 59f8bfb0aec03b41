//! Utility functions supporting the routing engine.
//!
//! - [`path`] - RFC 3986 path normalization and upstream URL assembly
//! - [`flow_id`] - request flow id generation
//!
//! Path handling here is load-bearing for matching: routes and requests are
//! compared after the same normalization, so a path carrying an escaped
//! reserved character (`%2F`) stays distinct from its decoded form.

pub mod flow_id;
pub mod path;
