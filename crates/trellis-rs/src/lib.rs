//! # Trellis routing engine
//!
//! An HTTP reverse proxy and routing engine. Incoming requests are matched
//! against a table of declarative rules, transformed by an ordered filter
//! chain, forwarded to a resolved backend (possibly chosen by load
//! balancing), and the response is transformed by the same chain in
//! reverse. The table is replaced atomically while requests are in flight.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trellis_rs::proxy::{ProxyEngine, ProxySettings};
//! use trellis_rs::routing::builder::Registries;
//! use trellis_rs::routing::data_client::StaticDataClient;
//! use trellis_rs::routing::manager::{RoutingSettings, RoutingTableManager};
//! use trellis_rs::routing::table::{RoutingTable, TableHolder};
//! use trellis_rs::services::endpoint_registry::{EndpointRegistry, PassiveHealthSettings};
//! use trellis_rs::services::load_balancer::LbOptions;
//!
//! let client = Arc::new(StaticDataClient::new(Vec::new()));
//! client.set_eskip(r#"hello: Path("/hello") -> status(200) -> <shunt>;"#).unwrap();
//!
//! let registry = Arc::new(EndpointRegistry::new(
//!     PassiveHealthSettings::default(),
//!     Duration::from_secs(60),
//! ));
//! let holder = Arc::new(TableHolder::new(RoutingTable::empty(registry.clone())));
//! let manager = RoutingTableManager::new(
//!     vec![client],
//!     Arc::new(Registries::with_builtins()),
//!     holder.clone(),
//!     registry,
//!     RoutingSettings::default(),
//!     LbOptions::default(),
//! );
//! manager.rebuild_now();
//!
//! let engine = ProxyEngine::new(holder, ProxySettings::default());
//! // Bind `engine` to an actix-web catch-all via routes::proxy::configure_proxy.
//! # let _ = engine;
//! ```
//!
//! ## Core pieces
//!
//! - A [`Route`](models::route::Route) combines predicates, a filter chain,
//!   and a backend; routes are written in the definition grammar
//!   implemented by [`eskip`].
//! - The [`matcher`](routing::matcher) compiles a route set into method and
//!   host buckets over a path trie and answers lookups deterministically by
//!   specificity.
//! - [`Filters`](filters::Filter) transform request and response; a filter
//!   can serve the response directly and short-circuit the backend.
//! - The [`manager`](routing::manager) ingests definitions from data
//!   clients, validates them against the spec registries, and swaps the
//!   live [`table`](routing::table) atomically.
//! - The [`engine`](proxy::ProxyEngine) drives one exchange end to end,
//!   including loopback, shunt, and dynamic backends, endpoint selection
//!   with passive health and fade-in, and upstream error classification.
//!
//! ## Module Organization
//!
//! - [`config`] - settings loading and startup validation
//! - [`eskip`] - the route definition grammar (lexer, parser, printer)
//! - [`filters`] - filter contract, context, and built-ins
//! - [`logs`] - structured logger setup
//! - [`models`] - routes, exchange types, errors, settings
//! - [`predicates`] - predicate contract and built-ins
//! - [`proxy`] - the proxy engine
//! - [`routes`] - actix-web endpoint configuration
//! - [`routing`] - trie, matcher, table, data clients, manager
//! - [`services`] - endpoint registry, load balancers, breakers, limiters
//! - [`utils`] - path normalization, flow ids

pub mod config;
pub mod eskip;
pub mod filters;
pub mod logs;
pub mod models;
pub mod predicates;
pub mod proxy;
pub mod routes;
pub mod routing;
pub mod services;
pub mod utils;
