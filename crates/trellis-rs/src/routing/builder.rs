//! Validated construction of routes from parsed definitions.
//!
//! The builder recognizes the indexed predicates (path, host, method,
//! weight) and compiles them into the route's match conditions; everything
//! else goes through the predicate registry. A route is only accepted once
//! every predicate and every filter has been successfully constructed from
//! its spec with the route's literal arguments.

use crate::eskip::args::invalid_args;
use crate::eskip::{ArgValue, BackendDef, NamedArgsDef, RouteDef};
use crate::filters::FilterRegistry;
use crate::models::error::ConfigError;
use crate::models::route::{Backend, Endpoint, HostMatch, LbAlgorithm, PathMatch, PathSegment, Route};
use crate::predicates::PredicateRegistry;
use crate::utils::path::{normalize_path, split_segments};
use actix_web::http::Method;
use regex::Regex;

/// The spec registries a table build (or admission validation) runs
/// against. Built once at startup and threaded through explicitly.
pub struct Registries {
    pub predicates: PredicateRegistry,
    pub filters: FilterRegistry,
}

impl Registries {
    pub fn new(predicates: PredicateRegistry, filters: FilterRegistry) -> Self {
        Self {
            predicates,
            filters,
        }
    }

    pub fn with_builtins() -> Self {
        Self {
            predicates: PredicateRegistry::with_builtins(),
            filters: FilterRegistry::with_builtins(),
        }
    }
}

fn single_string<'a>(def: &'a NamedArgsDef) -> Result<&'a str, ConfigError> {
    match def.args.as_slice() {
        [ArgValue::Str(s)] => Ok(s),
        _ => Err(invalid_args(&def.name, "expected one string argument")),
    }
}

fn pattern_source<'a>(def: &'a NamedArgsDef) -> Result<&'a str, ConfigError> {
    match def.args.as_slice() {
        [ArgValue::Str(s)] | [ArgValue::Regex(s)] => Ok(s),
        _ => Err(invalid_args(&def.name, "expected one pattern argument")),
    }
}

fn parse_path_pattern(def: &NamedArgsDef) -> Result<Vec<PathSegment>, ConfigError> {
    let raw = single_string(def)?;
    if !raw.starts_with('/') {
        return Err(invalid_args(&def.name, "path must start with '/'"));
    }
    let normalized = normalize_path(raw);
    let mut segments = Vec::new();
    for segment in split_segments(&normalized) {
        match segment.strip_prefix(':') {
            Some("") => {
                return Err(invalid_args(&def.name, "parameter segment needs a name"));
            }
            Some(name) => segments.push(PathSegment::Param(name.to_string())),
            None => segments.push(PathSegment::Literal(segment.to_string())),
        }
    }
    Ok(segments)
}

fn parse_subtree_pattern(def: &NamedArgsDef) -> Result<String, ConfigError> {
    let raw = single_string(def)?;
    if !raw.starts_with('/') {
        return Err(invalid_args(&def.name, "path must start with '/'"));
    }
    let normalized = normalize_path(raw);
    if normalized == "/" {
        return Ok(normalized);
    }
    Ok(normalized.trim_end_matches('/').to_string())
}

/// Classifies a host pattern: an anchored pattern made of literal
/// characters only becomes an exact index key, anything else stays a regex
/// evaluated per candidate.
fn parse_host_pattern(def: &NamedArgsDef) -> Result<HostMatch, ConfigError> {
    let source = pattern_source(def)?;
    let regex = Regex::new(source)
        .map_err(|e| invalid_args(&def.name, format!("invalid pattern: {}", e)))?;

    let Some(anchored) = source
        .strip_prefix('^')
        .and_then(|s| s.strip_suffix('$'))
    else {
        return Ok(HostMatch::Pattern(regex));
    };
    let mut literal = String::with_capacity(anchored.len());
    let mut chars = anchored.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('.') => literal.push('.'),
                _ => return Ok(HostMatch::Pattern(regex)),
            },
            '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' => {
                return Ok(HostMatch::Pattern(regex));
            }
            _ => literal.push(ch.to_ascii_lowercase()),
        }
    }
    if literal.is_empty() {
        return Ok(HostMatch::Pattern(regex));
    }
    Ok(HostMatch::Exact(literal))
}

fn parse_method(def: &NamedArgsDef, raw: &str) -> Result<Method, ConfigError> {
    Method::from_bytes(raw.to_uppercase().as_bytes())
        .map_err(|_| invalid_args(&def.name, format!("invalid method {:?}", raw)))
}

fn build_backend(def: &RouteDef) -> Result<Backend, ConfigError> {
    match &def.backend {
        BackendDef::Network(url) => {
            // Validate the URL even though the string form is kept.
            Endpoint::parse(url)?;
            Ok(Backend::Network(url.clone()))
        }
        BackendDef::Shunt => Ok(Backend::Shunt),
        BackendDef::Loopback => Ok(Backend::Loopback),
        BackendDef::Dynamic => Ok(Backend::Dynamic),
        BackendDef::LoadBalanced {
            algorithm,
            endpoints,
        } => {
            let algorithm = LbAlgorithm::parse(algorithm).ok_or_else(|| {
                ConfigError::InvalidBackend(format!("unknown load balancer algorithm: {}", algorithm))
            })?;
            let endpoints = endpoints
                .iter()
                .map(|url| Endpoint::parse(url))
                .collect::<Result<Vec<Endpoint>, ConfigError>>()?;
            Ok(Backend::LoadBalanced {
                algorithm,
                endpoints,
            })
        }
    }
}

/// Builds one route from its definition, validating every predicate and
/// filter against the registries. No side effects: load-balancer state is
/// bound later by the table build's post-processors.
pub fn build_route(def: &RouteDef, registries: &Registries) -> Result<Route, ConfigError> {
    if def.id.is_empty() {
        return Err(ConfigError::InvalidRoute {
            id: String::new(),
            reason: "empty route id".to_string(),
        });
    }

    let mut path = PathMatch::None;
    let mut host = HostMatch::Any;
    let mut methods: Vec<Method> = Vec::new();
    let mut weight: i32 = 0;
    let mut predicates = Vec::new();

    let set_path = |new: PathMatch, current: &mut PathMatch| -> Result<(), ConfigError> {
        if !matches!(current, PathMatch::None) {
            return Err(ConfigError::InvalidRoute {
                id: def.id.clone(),
                reason: "multiple path predicates".to_string(),
            });
        }
        *current = new;
        Ok(())
    };

    for pred in &def.predicates {
        match pred.name.as_str() {
            "Path" => set_path(PathMatch::Exact(parse_path_pattern(pred)?), &mut path)?,
            "PathSubtree" => set_path(PathMatch::Subtree(parse_subtree_pattern(pred)?), &mut path)?,
            "PathRegexp" => {
                let source = pattern_source(pred)?;
                let regex = Regex::new(source)
                    .map_err(|e| invalid_args(&pred.name, format!("invalid pattern: {}", e)))?;
                set_path(PathMatch::Regexp(regex), &mut path)?;
            }
            "Host" => host = parse_host_pattern(pred)?,
            "Method" => {
                methods.push(parse_method(pred, single_string(pred)?)?);
            }
            "Methods" => {
                if pred.args.is_empty() {
                    return Err(invalid_args(&pred.name, "expected at least one method"));
                }
                for i in 0..pred.args.len() {
                    let raw = pred.args[i]
                        .as_str()
                        .ok_or_else(|| invalid_args(&pred.name, "methods must be strings"))?;
                    methods.push(parse_method(pred, raw)?);
                }
            }
            "Weight" => {
                let value = match pred.args.as_slice() {
                    [ArgValue::Number(n)] if n.fract() == 0.0 && *n >= 0.0 => *n as i32,
                    _ => {
                        return Err(invalid_args(
                            &pred.name,
                            "expected one non-negative integer",
                        ))
                    }
                };
                weight = value;
            }
            _ => predicates.push(registries.predicates.create(&pred.name, &pred.args)?),
        }
    }

    let mut filters = Vec::with_capacity(def.filters.len());
    for filter in &def.filters {
        filters.push(registries.filters.create(&filter.name, &filter.args)?);
    }

    Ok(Route {
        id: def.id.clone(),
        path,
        host,
        methods,
        predicates,
        predicate_count: def.predicates.len(),
        filters,
        backend: build_backend(def)?,
        weight,
        lb: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eskip::parse_one;

    fn build(route: &str) -> Result<Route, ConfigError> {
        build_route(&parse_one(route).unwrap(), &Registries::with_builtins())
    }

    #[test]
    fn builds_indexed_conditions() {
        let route = build(
            r#"r: Path("/api/:id") && Host(/^api\.example\.org$/) && Method("GET") && Weight(4) -> <shunt>;"#,
        )
        .unwrap();
        assert!(matches!(route.path, PathMatch::Exact(ref s) if s.len() == 2));
        assert!(matches!(route.host, HostMatch::Exact(ref h) if h == "api.example.org"));
        assert_eq!(route.methods, vec![Method::GET]);
        assert_eq!(route.weight, 4);
        assert_eq!(route.predicate_count, 4);
        assert!(route.predicates.is_empty());
    }

    #[test]
    fn non_literal_host_stays_a_pattern() {
        let route = build(r#"r: Host(/^.*[.]example[.]org$/) -> <shunt>;"#).unwrap();
        assert!(matches!(route.host, HostMatch::Pattern(_)));
        let unanchored = build(r#"r: Host(/example[.]org/) -> <shunt>;"#).unwrap();
        assert!(matches!(unanchored.host, HostMatch::Pattern(_)));
    }

    #[test]
    fn rejects_duplicate_path_predicates() {
        let err = build(r#"r: Path("/a") && PathSubtree("/b") -> <shunt>;"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoute { .. }));
    }

    #[test]
    fn rejects_unknown_names_and_bad_args() {
        assert!(matches!(
            build(r#"r: Frobnicate("x") -> <shunt>;"#).unwrap_err(),
            ConfigError::UnknownPredicate(_)
        ));
        assert!(matches!(
            build(r#"r: * -> frobnicate("x") -> <shunt>;"#).unwrap_err(),
            ConfigError::UnknownFilter(_)
        ));
        assert!(matches!(
            build(r#"r: Path(42) -> <shunt>;"#).unwrap_err(),
            ConfigError::InvalidArgs { .. }
        ));
        assert!(matches!(
            build(r#"r: * -> "ftp://nope";"#).unwrap_err(),
            ConfigError::InvalidBackend(_)
        ));
        assert!(matches!(
            build(r#"r: * -> <powerOfRandomNChoices, "http://a", "nope">;"#).unwrap_err(),
            ConfigError::InvalidBackend(_)
        ));
    }

    #[test]
    fn path_patterns_are_normalized_like_requests() {
        let route = build(r#"r: Path("/caf%65/%2Fescaped") -> <shunt>;"#).unwrap();
        let PathMatch::Exact(segments) = route.path else {
            panic!("expected exact path");
        };
        assert_eq!(
            segments,
            vec![
                PathSegment::Literal("cafe".to_string()),
                PathSegment::Literal("%2Fescaped".to_string()),
            ]
        );
    }

    #[test]
    fn load_balanced_backends_resolve_endpoints() {
        let route = build(r#"r: * -> <roundRobin, "http://a:80", "http://b:8080">;"#).unwrap();
        let Backend::LoadBalanced {
            algorithm,
            endpoints,
        } = route.backend
        else {
            panic!("expected load balanced backend");
        };
        assert_eq!(algorithm, LbAlgorithm::RoundRobin);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].key(), "b:8080");
    }
}
