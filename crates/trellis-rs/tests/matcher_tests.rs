//! Matcher behavior: specificity ordering, bucket indexing, parameter
//! capture, path normalization, and deterministic lookups.

use actix_web::http::header::HeaderMap;
use actix_web::http::Method;
use actix_web::web::Bytes;
use std::sync::Arc;
use trellis_rs::eskip;
use trellis_rs::models::exchange::GatewayRequest;
use trellis_rs::models::route::Route;
use trellis_rs::routing::builder::{build_route, Registries};
use trellis_rs::routing::matcher::Matcher;
use trellis_rs::utils::path::normalize_path;

fn matcher(routes_text: &str) -> Matcher {
    let defs = eskip::parse(routes_text).unwrap();
    let registries = Registries::with_builtins();
    let routes: Vec<Arc<Route>> = defs
        .iter()
        .map(|def| Arc::new(build_route(def, &registries).expect(&def.id)))
        .collect();
    Matcher::new(routes, None)
}

fn request(method: Method, host: &str, path: &str) -> GatewayRequest {
    GatewayRequest {
        method,
        path: normalize_path(path),
        query: String::new(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
        peer_ip: None,
        host: host.to_string(),
        scheme: "http".to_string(),
    }
}

fn matched_id(matcher: &Matcher, method: Method, host: &str, path: &str) -> Option<String> {
    matcher
        .lookup(&request(method, host, path))
        .map(|m| m.route.id.clone())
}

#[test]
fn exact_beats_subtree_beats_regexp_beats_pathless() {
    let m = matcher(
        r#"
        anything: * -> <shunt>;
        re: PathRegexp(/^\/api\/.*$/) -> <shunt>;
        tree: PathSubtree("/api") -> <shunt>;
        exact: Path("/api/users") -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/api/users").as_deref(),
        Some("exact")
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/api/other").as_deref(),
        Some("tree")
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/elsewhere").as_deref(),
        Some("anything")
    );
}

#[test]
fn host_specificity_breaks_path_ties() {
    let m = matcher(
        r#"
        plain: Path("/x") -> <shunt>;
        hosted: Path("/x") && Host(/^api\.example\.org$/) -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "api.example.org", "/x").as_deref(),
        Some("hosted")
    );
    assert_eq!(
        matched_id(&m, Method::GET, "other.example.org", "/x").as_deref(),
        Some("plain")
    );
}

#[test]
fn predicate_count_and_weight_break_remaining_ties() {
    let m = matcher(
        r#"
        one: Path("/x") -> <shunt>;
        two: Path("/x") && Method("GET") -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/x").as_deref(),
        Some("two")
    );
    assert_eq!(
        matched_id(&m, Method::POST, "h", "/x").as_deref(),
        Some("one")
    );

    let weighted = matcher(
        r#"
        heavy: Path("/x") && Weight(5) && True() -> <shunt>;
        light: Path("/x") && True() && True() -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&weighted, Method::GET, "h", "/x").as_deref(),
        Some("heavy")
    );
}

#[test]
fn equal_specificity_falls_back_to_route_id_order() {
    let m = matcher(
        r#"
        zebra: Path("/x") -> <shunt>;
        apple: Path("/x") -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/x").as_deref(),
        Some("apple")
    );
}

#[test]
fn method_buckets_filter_before_predicates() {
    let m = matcher(
        r#"
        get_only: Path("/x") && Method("GET") -> <shunt>;
        multi: Path("/y") && Methods("PUT", "PATCH") -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/x").as_deref(),
        Some("get_only")
    );
    assert_eq!(matched_id(&m, Method::POST, "h", "/x"), None);
    assert_eq!(
        matched_id(&m, Method::PUT, "h", "/y").as_deref(),
        Some("multi")
    );
    assert_eq!(
        matched_id(&m, Method::PATCH, "h", "/y").as_deref(),
        Some("multi")
    );
    assert_eq!(matched_id(&m, Method::DELETE, "h", "/y"), None);
}

#[test]
fn pattern_hosts_fall_back_to_regex_evaluation() {
    let m = matcher(
        r#"
        wild: Path("/x") && Host(/^.*\.example\.org$/) -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "a.example.org", "/x").as_deref(),
        Some("wild")
    );
    assert_eq!(matched_id(&m, Method::GET, "example.com", "/x"), None);
}

#[test]
fn path_params_are_captured_and_decoded() {
    let m = matcher(r#"users: Path("/users/:id/posts/:post") -> <shunt>;"#);
    let result = m
        .lookup(&request(Method::GET, "h", "/users/jo%20do/posts/42"))
        .unwrap();
    assert_eq!(result.params.get("id").map(String::as_str), Some("jo do"));
    assert_eq!(result.params.get("post").map(String::as_str), Some("42"));
}

#[test]
fn escaped_slash_routes_stay_distinct() {
    let m = matcher(
        r#"
        escaped: Path("/a%2Fb") -> <shunt>;
        plain: Path("/a/b") -> <shunt>;
        "#,
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/a%2Fb").as_deref(),
        Some("escaped")
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/a%2fb").as_deref(),
        Some("escaped")
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/a/b").as_deref(),
        Some("plain")
    );
}

#[test]
fn unreserved_escapes_match_their_decoded_form() {
    let m = matcher(r#"cafe: Path("/cafe") -> <shunt>;"#);
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/caf%65").as_deref(),
        Some("cafe")
    );
}

#[test]
fn lookup_is_deterministic() {
    let m = matcher(
        r#"
        a: PathSubtree("/api") -> <shunt>;
        b: PathSubtree("/api") -> <shunt>;
        c: PathRegexp(/^\/api/) -> <shunt>;
        "#,
    );
    let first = matched_id(&m, Method::GET, "h", "/api/x");
    for _ in 0..32 {
        assert_eq!(matched_id(&m, Method::GET, "h", "/api/x"), first);
    }
}

#[test]
fn default_route_serves_misses() {
    let defs = eskip::parse(
        r#"
        real: Path("/real") -> <shunt>;
        fallback: False() -> status(404) -> <shunt>;
        "#,
    )
    .unwrap();
    let registries = Registries::with_builtins();
    let routes: Vec<Arc<Route>> = defs
        .iter()
        .map(|def| Arc::new(build_route(def, &registries).unwrap()))
        .collect();
    let fallback = routes[1].clone();
    let m = Matcher::new(routes, Some(fallback));
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/nowhere").as_deref(),
        Some("fallback")
    );
    assert_eq!(
        matched_id(&m, Method::GET, "h", "/real").as_deref(),
        Some("real")
    );
}

#[test]
fn header_and_cookie_predicates_gate_candidates() {
    let m = matcher(
        r#"
        gated: Path("/x") && Header("X-Mode", "on") -> <shunt>;
        open: Path("/x") -> <shunt>;
        "#,
    );
    let mut req = request(Method::GET, "h", "/x");
    assert_eq!(m.lookup(&req).unwrap().route.id, "open");
    req.headers.insert(
        actix_web::http::header::HeaderName::from_static("x-mode"),
        actix_web::http::header::HeaderValue::from_static("on"),
    );
    assert_eq!(m.lookup(&req).unwrap().route.id, "gated");
}
