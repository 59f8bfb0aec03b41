//! Compiled request-to-route lookup.
//!
//! Routes are indexed by method (with a catch-all bucket for method-less
//! routes), then by exact host (with a fallback bucket for pattern hosts),
//! then by a path trie. A lookup collects every candidate whose indexed
//! conditions cover the request, orders them by specificity, and returns
//! the first candidate whose remaining predicates all match. Equal inputs
//! always yield equal outputs: candidate order is fully determined by the
//! specificity key and the route id.

use crate::models::exchange::GatewayRequest;
use crate::models::route::{HostMatch, PathMatch, PathSegment, Route};
use crate::routing::trie::PathTrie;
use crate::utils::path::{percent_decode, split_segments};
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use std::sync::Arc;

/// A successful lookup: the route plus the path parameters its path
/// predicate captured.
pub struct MatchResult {
    pub route: Arc<Route>,
    pub params: AHashMap<String, String>,
}

#[derive(Default)]
struct PathIndex {
    trie: PathTrie,
    regexp: Vec<usize>,
    pathless: Vec<usize>,
}

impl PathIndex {
    fn insert(&mut self, route: &Route, idx: usize) {
        match &route.path {
            PathMatch::Exact(segments) => self.trie.insert_exact(segments, idx),
            PathMatch::Subtree(prefix) => self.trie.insert_subtree(prefix, idx),
            PathMatch::Regexp(_) => self.regexp.push(idx),
            PathMatch::None => self.pathless.push(idx),
        }
    }

    fn collect(&self, path: &str, routes: &[Arc<Route>], out: &mut Vec<usize>) {
        self.trie.lookup(path, out);
        for &idx in &self.regexp {
            if let PathMatch::Regexp(re) = &routes[idx].path {
                if re.is_match(path) {
                    out.push(idx);
                }
            }
        }
        out.extend_from_slice(&self.pathless);
    }
}

#[derive(Default)]
struct HostIndex {
    by_host: AHashMap<String, PathIndex>,
    any_host: PathIndex,
}

impl HostIndex {
    fn insert(&mut self, route: &Route, idx: usize) {
        match &route.host {
            HostMatch::Exact(host) => self
                .by_host
                .entry(host.clone())
                .or_default()
                .insert(route, idx),
            _ => self.any_host.insert(route, idx),
        }
    }

    fn collect(&self, req: &GatewayRequest, routes: &[Arc<Route>], out: &mut Vec<usize>) {
        if let Some(index) = self.by_host.get(&req.host) {
            index.collect(&req.path, routes, out);
        }
        self.any_host.collect(&req.path, routes, out);
    }
}

/// Immutable compiled lookup over one route set. Its only mutator is full
/// replacement through a table swap.
pub struct Matcher {
    routes: Vec<Arc<Route>>,
    by_method: AHashMap<String, HostIndex>,
    any_method: HostIndex,
    default_route: Option<Arc<Route>>,
}

impl Matcher {
    pub fn new(routes: Vec<Arc<Route>>, default_route: Option<Arc<Route>>) -> Self {
        let mut by_method: AHashMap<String, HostIndex> = AHashMap::new();
        let mut any_method = HostIndex::default();
        for (idx, route) in routes.iter().enumerate() {
            if route.methods.is_empty() {
                any_method.insert(route, idx);
            } else {
                for method in &route.methods {
                    by_method
                        .entry(method.as_str().to_string())
                        .or_default()
                        .insert(route, idx);
                }
            }
        }
        Self {
            routes,
            by_method,
            any_method,
            default_route,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the best matching route and its captured path parameters, or
    /// the configured default route, or nothing.
    pub fn lookup(&self, req: &GatewayRequest) -> Option<MatchResult> {
        let mut candidates: Vec<usize> = Vec::new();
        if let Some(index) = self.by_method.get(req.method.as_str()) {
            index.collect(req, &self.routes, &mut candidates);
        }
        self.any_method.collect(req, &self.routes, &mut candidates);

        // Most specific first; route id keeps equal-specificity candidates
        // in a stable, deterministic order.
        candidates.sort_by(|&a, &b| {
            let ra = &self.routes[a];
            let rb = &self.routes[b];
            rb.specificity()
                .cmp(&ra.specificity())
                .then_with(|| ra.id.cmp(&rb.id))
        });

        'candidates: for &idx in &candidates {
            let route = &self.routes[idx];
            if let HostMatch::Pattern(re) = &route.host {
                if !re.is_match(&req.host) {
                    continue;
                }
            }
            for predicate in &route.predicates {
                if !predicate.matches(req) {
                    continue 'candidates;
                }
            }
            return Some(MatchResult {
                route: route.clone(),
                params: extract_params(route, &req.path),
            });
        }

        self.default_route.clone().map(|route| MatchResult {
            route,
            params: AHashMap::new(),
        })
    }
}

fn extract_params(route: &Route, path: &str) -> AHashMap<String, String> {
    let PathMatch::Exact(segments) = &route.path else {
        return AHashMap::new();
    };
    let mut params = AHashMap::new();
    for (segment, value) in segments.iter().zip(split_segments(path)) {
        if let PathSegment::Param(name) = segment {
            params.insert(name.clone(), percent_decode(value));
        }
    }
    params
}
