//! The filter contract, execution context, and registry.
//!
//! A filter is a bidirectional transformer: `on_request` runs while the
//! exchange travels toward the backend, `on_response` on the way back.
//! Within one exchange, request sides run in declared order and response
//! sides in reverse order of the filters that actually ran. A filter may
//! call [`FilterContext::serve`] during `on_request` to short-circuit the
//! exchange: the backend is skipped and the already-entered filters unwind
//! normally.
//!
//! Filters communicate through the [`StateBag`], a per-exchange map of
//! string keys to a small set of value shapes plus an opaque escape hatch
//! for filter-private types. Filter failures are recorded under
//! [`ERROR_STATE_KEY`] and do not unwind the pipeline; only `serve` does.

pub mod block;
pub mod builtin;

use crate::eskip::ArgValue;
use crate::models::error::ConfigError;
use crate::models::exchange::{GatewayRequest, GatewayResponse};
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use std::any::Any;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// State bag key under which filters record their failures.
pub const ERROR_STATE_KEY: &str = "trellis.filter.error";

/// State bag key a filter sets to choose the backend of a `<dynamic>` route.
pub const DYNAMIC_BACKEND_KEY: &str = "trellis.backend.url";

/// State bag key instructing the engine to keep the incoming `Host` header
/// on the upstream request.
pub const PRESERVE_HOST_KEY: &str = "trellis.backend.preserve-host";

/// State bag key holding a per-request upstream deadline, overriding the
/// engine-wide timeout.
pub const BACKEND_TIMEOUT_KEY: &str = "trellis.backend.timeout";

/// A value shared between filters of one exchange.
#[derive(Clone)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Duration(Duration),
    /// Escape hatch for filter-private types, recovered via
    /// [`StateValue::downcast_ref`].
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "Bool({})", v),
            Self::Int(v) => write!(f, "Int({})", v),
            Self::Float(v) => write!(f, "Float({})", v),
            Self::Str(v) => write!(f, "Str({:?})", v),
            Self::Duration(v) => write!(f, "Duration({:?})", v),
            Self::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Self::Opaque(v) => v.downcast_ref(),
            _ => None,
        }
    }
}

/// The per-exchange shared map by which filters communicate.
#[derive(Debug, Default)]
pub struct StateBag {
    values: AHashMap<String, StateValue>,
}

impl StateBag {
    pub fn new() -> Self {
        Self {
            values: AHashMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: StateValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(StateValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(StateValue::as_bool)
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Counter sink exposed to filters; snapshots feed the metrics endpoint.
#[derive(Debug, Default)]
pub struct FilterMetrics {
    counters: RwLock<AHashMap<String, u64>>,
}

impl FilterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, key: &str) {
        let mut counters = self.counters.write().expect("filter metrics lock poisoned");
        *counters.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let counters = self.counters.read().expect("filter metrics lock poisoned");
        let mut entries: Vec<(String, u64)> =
            counters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort();
        entries
    }
}

/// Execution context of one proxied exchange.
///
/// Exposes the mutable current request, a read-only snapshot of the original
/// request, the response slot (populated by the upstream call or by
/// `serve`), the state bag, the path parameters captured by the matched
/// route, and a metrics sink.
pub struct FilterContext {
    pub request: GatewayRequest,
    original: GatewayRequest,
    pub response: Option<GatewayResponse>,
    pub state: StateBag,
    params: AHashMap<String, String>,
    pub metrics: Arc<FilterMetrics>,
    served: bool,
}

impl FilterContext {
    pub fn new(request: GatewayRequest, metrics: Arc<FilterMetrics>) -> Self {
        Self {
            original: request.clone(),
            request,
            response: None,
            state: StateBag::new(),
            params: AHashMap::new(),
            metrics,
            served: false,
        }
    }

    /// The request as it arrived at the proxy, before any filter ran.
    pub fn original(&self) -> &GatewayRequest {
        &self.original
    }

    /// Short-circuits the exchange: the backend is skipped and the response
    /// side of the already-entered filters runs over this response.
    pub fn serve(&mut self, response: GatewayResponse) {
        self.response = Some(response);
        self.served = true;
    }

    pub fn is_served(&self) -> bool {
        self.served
    }

    /// Path parameter captured by the matched route's path predicate.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Replaces the captured parameters; called by the engine on every
    /// (re-)match.
    pub fn set_params(&mut self, params: AHashMap<String, String>) {
        self.params = params;
    }

    /// Records a filter failure without unwinding the pipeline.
    pub fn record_error(&mut self, filter: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("filter {} failed: {}", filter, message);
        self.metrics.incr(&format!("filter.{}.errors", filter));
        self.state.set(
            ERROR_STATE_KEY,
            StateValue::Str(format!("{}: {}", filter, message)),
        );
    }
}

/// A bidirectional transformer attached to a route.
pub trait Filter: Send + Sync {
    fn on_request(&self, ctx: &mut FilterContext);
    fn on_response(&self, ctx: &mut FilterContext);

    /// Called once when the table that owns this filter instance is retired,
    /// after the drain grace period.
    fn close(&self) {}
}

/// Factory for one named filter kind. Arguments are validated here, at
/// table-build time.
pub trait FilterSpec: Send + Sync {
    fn name(&self) -> &'static str;
    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError>;
}

/// Registry of filter specs, threaded through the table manager and the
/// admission endpoints.
pub struct FilterRegistry {
    specs: AHashMap<String, Arc<dyn FilterSpec>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            specs: AHashMap::new(),
        }
    }

    /// A registry populated with the built-in filters, backed by a private
    /// rate limiter registry.
    pub fn with_builtins() -> Self {
        Self::with_builtins_using(Arc::new(crate::services::ratelimit::RatelimitRegistry::new()))
    }

    /// A registry populated with the built-in filters, sharing the given
    /// rate limiter registry.
    pub fn with_builtins_using(
        ratelimits: Arc<crate::services::ratelimit::RatelimitRegistry>,
    ) -> Self {
        let mut registry = Self::new();
        for spec in builtin::specs(ratelimits) {
            registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: Arc<dyn FilterSpec>) {
        self.specs.insert(spec.name().to_string(), spec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn create(&self, name: &str, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| ConfigError::UnknownFilter(name.to_string()))?;
        spec.create(args)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderMap;
    use actix_web::http::{Method, StatusCode};
    use actix_web::web::Bytes;

    fn context() -> FilterContext {
        let request = GatewayRequest {
            method: Method::GET,
            path: "/a".to_string(),
            query: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer_ip: None,
            host: "example.org".to_string(),
            scheme: "http".to_string(),
        };
        FilterContext::new(request, Arc::new(FilterMetrics::new()))
    }

    #[test]
    fn original_request_is_immutable_under_mutation() {
        let mut ctx = context();
        ctx.request.path = "/rewritten".to_string();
        assert_eq!(ctx.original().path, "/a");
        assert_eq!(ctx.request.path, "/rewritten");
    }

    #[test]
    fn serve_marks_the_context_served() {
        let mut ctx = context();
        assert!(!ctx.is_served());
        ctx.serve(GatewayResponse::new(StatusCode::IM_A_TEAPOT));
        assert!(ctx.is_served());
        assert_eq!(
            ctx.response.as_ref().map(|r| r.status),
            Some(StatusCode::IM_A_TEAPOT)
        );
    }

    #[test]
    fn state_bag_round_trips_value_shapes() {
        let mut bag = StateBag::new();
        bag.set("b", StateValue::Bool(true));
        bag.set("s", StateValue::Str("x".into()));
        bag.set("d", StateValue::Duration(Duration::from_secs(3)));
        bag.set("o", StateValue::Opaque(Arc::new(42_u32)));

        assert_eq!(bag.get_bool("b"), Some(true));
        assert_eq!(bag.get_str("s"), Some("x"));
        assert_eq!(
            bag.get("d").and_then(StateValue::as_duration),
            Some(Duration::from_secs(3))
        );
        assert_eq!(bag.get("o").and_then(|v| v.downcast_ref::<u32>()), Some(&42));
        assert_eq!(bag.get("o").and_then(|v| v.downcast_ref::<u64>()), None);
    }

    #[test]
    fn record_error_confines_the_failure_to_the_bag() {
        let mut ctx = context();
        ctx.record_error("status", "bad things");
        assert!(!ctx.is_served());
        assert!(ctx
            .state
            .get_str(ERROR_STATE_KEY)
            .unwrap()
            .contains("bad things"));
    }
}
