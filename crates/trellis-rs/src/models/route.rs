use crate::filters::Filter;
use crate::models::error::ConfigError;
use crate::predicates::Predicate;
use crate::services::load_balancer::LbBinding;
use actix_web::http::Method;
use regex::Regex;
use std::sync::Arc;

/// Load balancing algorithm for routes with multiple endpoints.
///
/// # Algorithms
///
/// - **RoundRobin**: atomic counter modulo endpoint count (default)
/// - **Random**: uniform random selection
/// - **ConsistentHash**: hash of a request key (client IP by default) onto
///   the endpoint set, with an optional balance factor that caps per-endpoint
///   overload relative to the average in-flight count
/// - **PowerOfRandomNChoices**: N random picks, lowest in-flight wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbAlgorithm {
    RoundRobin,
    Random,
    ConsistentHash,
    PowerOfRandomNChoices,
}

impl Default for LbAlgorithm {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl LbAlgorithm {
    /// Parses the algorithm name as it appears in route definitions.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "roundRobin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "consistentHash" => Some(Self::ConsistentHash),
            "powerOfRandomNChoices" => Some(Self::PowerOfRandomNChoices),
            _ => None,
        }
    }

    /// The definition-language name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "roundRobin",
            Self::Random => "random",
            Self::ConsistentHash => "consistentHash",
            Self::PowerOfRandomNChoices => "powerOfRandomNChoices",
        }
    }
}

/// One concrete upstream target.
///
/// Endpoints are identified by `host:port`; stats for endpoints shared by
/// several load-balanced routes are shared through the endpoint registry
/// under that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parses an endpoint from a `scheme://host[:port]` URL string.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidBackend(format!("missing scheme: {}", url)))?;
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::InvalidBackend(format!(
                "unsupported scheme {}: {}",
                scheme, url
            )));
        }
        // Strip any path suffix; endpoints address a host, not a resource.
        let authority = rest.split('/').next().unwrap_or(rest);
        if authority.is_empty() {
            return Err(ConfigError::InvalidBackend(format!("missing host: {}", url)));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| ConfigError::InvalidBackend(format!("invalid port: {}", url)))?;
                (h.to_string(), port)
            }
            None => {
                let port = if scheme == "https" { 443 } else { 80 };
                (authority.to_string(), port)
            }
        };
        if host.is_empty() {
            return Err(ConfigError::InvalidBackend(format!("missing host: {}", url)));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_lowercase(),
            port,
        })
    }

    /// Registry key for this endpoint.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL without a path, e.g. `http://backend:8080`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Backend variant of a route.
///
/// - `Network`: forward to a fixed upstream URL
/// - `Shunt`: do not call upstream; the response comes from the filter chain
/// - `Loopback`: re-match the (possibly rewritten) request against the table
/// - `Dynamic`: a filter sets the backend URL in the state bag at runtime
/// - `LoadBalanced`: pick one endpoint per request using the algorithm
#[derive(Debug, Clone)]
pub enum Backend {
    Network(String),
    Shunt,
    Loopback,
    Dynamic,
    LoadBalanced {
        algorithm: LbAlgorithm,
        endpoints: Vec<Endpoint>,
    },
}

/// One segment of an exact path pattern.
///
/// `Param` segments come from `:name` placeholders and capture the request
/// segment under that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Param(String),
}

/// Compiled path condition of a route, extracted from its path predicate.
#[derive(Debug, Clone)]
pub enum PathMatch {
    /// No path predicate; matches any path.
    None,
    /// Exact segment-by-segment match with optional captures.
    Exact(Vec<PathSegment>),
    /// Matches the prefix itself or any `/`-bounded extension of it.
    Subtree(String),
    /// Regular-expression match on the normalized path.
    Regexp(Regex),
}

impl PathMatch {
    /// Specificity rank used for tie-breaks: exact > subtree > regexp > none.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Exact(_) => 3,
            Self::Subtree(_) => 2,
            Self::Regexp(_) => 1,
            Self::None => 0,
        }
    }
}

/// Compiled host condition of a route.
///
/// `Exact` hosts are index keys in the matcher; `Pattern` hosts fall back to
/// regex evaluation during candidate filtering.
#[derive(Debug, Clone)]
pub enum HostMatch {
    Any,
    Exact(String),
    Pattern(Regex),
}

impl HostMatch {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Exact(_) => 2,
            Self::Pattern(_) => 1,
            Self::Any => 0,
        }
    }
}

/// The canonical routing unit: a declarative rule combining match conditions,
/// a filter chain, and a backend.
///
/// A route matches a request iff its path, host, and method conditions and
/// every remaining predicate match. Routes are immutable once installed in a
/// table; configuration changes replace the whole table.
///
/// Path, host, and method conditions are split out of the predicate list at
/// build time so the matcher can index them; `predicate_count` still reflects
/// the full declared predicate list for specificity ordering.
pub struct Route {
    /// Stable identifier, unique within a table.
    pub id: String,
    /// Path condition, indexed by the matcher's trie.
    pub path: PathMatch,
    /// Host condition.
    pub host: HostMatch,
    /// Allowed methods; empty means any method.
    pub methods: Vec<Method>,
    /// Predicates not captured by the path/host/method indexes, evaluated in
    /// declaration order.
    pub predicates: Vec<Arc<dyn Predicate>>,
    /// Number of predicates in the original definition, for specificity.
    pub predicate_count: usize,
    /// Filter chain; request direction forward, response direction reverse.
    pub filters: Vec<Arc<dyn Filter>>,
    /// Backend specification.
    pub backend: Backend,
    /// Explicit weight for specificity tie-breaks.
    pub weight: i32,
    /// Load-balancer state bound by the table build; `None` for routes that
    /// are not load balanced or were built for validation only.
    pub lb: Option<Arc<LbBinding>>,
}

impl Route {
    /// Specificity key, higher wins: path kind, host kind, declared predicate
    /// count, explicit weight. Ties fall back to route id order.
    pub fn specificity(&self) -> (u8, u8, usize, i32) {
        (
            self.path.rank(),
            self.host.rank(),
            self.predicate_count,
            self.weight,
        )
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("methods", &self.methods)
            .field("predicate_count", &self.predicate_count)
            .field("filters", &self.filters.len())
            .field("backend", &self.backend)
            .field("weight", &self.weight)
            .finish()
    }
}
