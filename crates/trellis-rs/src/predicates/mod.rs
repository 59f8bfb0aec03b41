//! The predicate contract and registry.
//!
//! A predicate is a pure test on a request. A route matches a request iff
//! every one of its predicates matches. Predicates are constructed from a
//! [`PredicateSpec`] plus literal arguments, validated once at table-build
//! time.
//!
//! The path, host, method, and weight predicates are recognized by the route
//! builder and compiled into the matcher's indexes instead of being
//! instantiated here; the registry carries everything else.

pub mod builtin;

use crate::eskip::ArgValue;
use crate::models::error::ConfigError;
use crate::models::exchange::GatewayRequest;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use std::sync::Arc;

/// A pure test on a request.
pub trait Predicate: Send + Sync {
    fn matches(&self, req: &GatewayRequest) -> bool;
}

/// Factory for one named predicate kind.
///
/// `create` validates the route's literal arguments and returns a ready
/// instance; runtime matching never re-parses arguments.
pub trait PredicateSpec: Send + Sync {
    fn name(&self) -> &'static str;
    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError>;
}

/// Registry of predicate specs, threaded through the table manager and the
/// admission endpoints.
pub struct PredicateRegistry {
    specs: AHashMap<String, Arc<dyn PredicateSpec>>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self {
            specs: AHashMap::new(),
        }
    }

    /// A registry populated with the built-in predicates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for spec in builtin::specs() {
            registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: Arc<dyn PredicateSpec>) {
        self.specs.insert(spec.name().to_string(), spec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn create(
        &self,
        name: &str,
        args: &[ArgValue],
    ) -> Result<Arc<dyn Predicate>, ConfigError> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPredicate(name.to_string()))?;
        spec.create(args)
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
