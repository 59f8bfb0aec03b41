//! Built-in filters.
//!
//! The set here covers what the engine itself and the default configuration
//! rely on: response seeding for shunt routes, path and header rewriting,
//! query manipulation, redirects, dynamic backend selection, flow ids, rate
//! limiting, body blocking, and a latency fault injector used to exercise
//! slow chains.

use super::block::{ContentMatcher, OverflowPolicy, ScanOutcome, DEFAULT_MAX_BUFFER_SIZE};
use super::{
    Filter, FilterContext, FilterSpec, StateValue, BACKEND_TIMEOUT_KEY, DYNAMIC_BACKEND_KEY,
    PRESERVE_HOST_KEY,
};
use crate::eskip::args::{expect_count, expect_number, expect_pattern, expect_string, invalid_args};
use crate::eskip::ArgValue;
use crate::models::error::ConfigError;
use crate::models::exchange::GatewayResponse;
use crate::services::ratelimit::{parse_window, Limiter, RatelimitRegistry, SlidingWindowLimiter};
use crate::utils::flow_id::{self, FLOW_ID_HEADER};
use crate::utils::path::normalize_path;
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// All built-in filter specs. Rate limiting filters share state through the
/// given registry.
pub fn specs(ratelimits: Arc<RatelimitRegistry>) -> Vec<Arc<dyn FilterSpec>> {
    vec![
        Arc::new(StatusSpec),
        Arc::new(InlineContentSpec),
        Arc::new(SetPathSpec),
        Arc::new(ModPathSpec),
        Arc::new(HeaderSpec {
            kind: HeaderFilterKind::SetRequest,
        }),
        Arc::new(HeaderSpec {
            kind: HeaderFilterKind::AppendRequest,
        }),
        Arc::new(HeaderSpec {
            kind: HeaderFilterKind::DropRequest,
        }),
        Arc::new(HeaderSpec {
            kind: HeaderFilterKind::SetResponse,
        }),
        Arc::new(HeaderSpec {
            kind: HeaderFilterKind::AppendResponse,
        }),
        Arc::new(HeaderSpec {
            kind: HeaderFilterKind::DropResponse,
        }),
        Arc::new(SetQuerySpec),
        Arc::new(DropQuerySpec),
        Arc::new(RedirectToSpec),
        Arc::new(PreserveHostSpec),
        Arc::new(SetDynamicBackendUrlSpec),
        Arc::new(FlowIdSpec),
        Arc::new(BackendTimeoutSpec),
        Arc::new(LatencySpec),
        Arc::new(RatelimitSpec {
            registry: ratelimits.clone(),
            per_client: false,
        }),
        Arc::new(RatelimitSpec {
            registry: ratelimits,
            per_client: true,
        }),
        Arc::new(BlockContentSpec),
    ]
}

fn status_from_number(name: &str, value: f64) -> Result<StatusCode, ConfigError> {
    if value.fract() != 0.0 || !(100.0..=599.0).contains(&value) {
        return Err(invalid_args(name, format!("invalid status code {}", value)));
    }
    StatusCode::from_u16(value as u16)
        .map_err(|_| invalid_args(name, format!("invalid status code {}", value)))
}

/// `status(418)`: fixes the response status. On the request side it seeds
/// the response slot so shunt routes serve it; on the response side it
/// overrides whatever the backend returned.
struct StatusFilter {
    status: StatusCode,
}

impl Filter for StatusFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.response
            .get_or_insert_with(|| GatewayResponse::new(self.status))
            .status = self.status;
    }

    fn on_response(&self, ctx: &mut FilterContext) {
        if let Some(resp) = ctx.response.as_mut() {
            resp.status = self.status;
        }
    }
}

struct StatusSpec;

impl FilterSpec for StatusSpec {
    fn name(&self) -> &'static str {
        "status"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        let status = status_from_number(self.name(), expect_number(self.name(), args, 0)?)?;
        Ok(Arc::new(StatusFilter { status }))
    }
}

/// `inlineContent("body")` or `inlineContent("body", "text/plain")`: seeds
/// the response body, typically combined with a shunt backend.
struct InlineContentFilter {
    body: Bytes,
    mime: String,
}

impl Filter for InlineContentFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        let resp = ctx
            .response
            .get_or_insert_with(|| GatewayResponse::new(StatusCode::OK));
        resp.body = self.body.clone();
        resp.insert_header("content-type", &self.mime);
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct InlineContentSpec;

impl FilterSpec for InlineContentSpec {
    fn name(&self) -> &'static str {
        "inlineContent"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        let mime = match args.len() {
            1 => "text/plain; charset=utf-8".to_string(),
            2 => expect_string(self.name(), args, 1)?.to_string(),
            n => {
                return Err(invalid_args(
                    self.name(),
                    format!("expected 1 or 2 arguments, got {}", n),
                ))
            }
        };
        Ok(Arc::new(InlineContentFilter {
            body: Bytes::from(expect_string(self.name(), args, 0)?.to_string()),
            mime,
        }))
    }
}

/// `setPath("/new/path")`: replaces the request path.
struct SetPathFilter {
    path: String,
}

impl Filter for SetPathFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.request.path = self.path.clone();
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct SetPathSpec;

impl FilterSpec for SetPathSpec {
    fn name(&self) -> &'static str {
        "setPath"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        let path = expect_string(self.name(), args, 0)?;
        if !path.starts_with('/') {
            return Err(invalid_args(self.name(), "path must start with '/'"));
        }
        Ok(Arc::new(SetPathFilter {
            path: normalize_path(path),
        }))
    }
}

/// `modPath(/pattern/, "replacement")`: regex rewrite of the request path.
struct ModPathFilter {
    pattern: Regex,
    replacement: String,
}

impl Filter for ModPathFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        let rewritten = self
            .pattern
            .replace_all(&ctx.request.path, self.replacement.as_str())
            .into_owned();
        ctx.request.path = rewritten;
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct ModPathSpec;

impl FilterSpec for ModPathSpec {
    fn name(&self) -> &'static str {
        "modPath"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 2)?;
        Ok(Arc::new(ModPathFilter {
            pattern: expect_pattern(self.name(), args, 0)?,
            replacement: expect_string(self.name(), args, 1)?.to_string(),
        }))
    }
}

#[derive(Clone, Copy)]
enum HeaderFilterKind {
    SetRequest,
    AppendRequest,
    DropRequest,
    SetResponse,
    AppendResponse,
    DropResponse,
}

impl HeaderFilterKind {
    fn name(&self) -> &'static str {
        match self {
            Self::SetRequest => "setRequestHeader",
            Self::AppendRequest => "appendRequestHeader",
            Self::DropRequest => "dropRequestHeader",
            Self::SetResponse => "setResponseHeader",
            Self::AppendResponse => "appendResponseHeader",
            Self::DropResponse => "dropResponseHeader",
        }
    }

    fn takes_value(&self) -> bool {
        !matches!(self, Self::DropRequest | Self::DropResponse)
    }
}

/// The header manipulation family. Set filters replace (last write wins),
/// append filters add values, drop filters remove the header.
struct HeaderFilter {
    kind: HeaderFilterKind,
    name: String,
    value: String,
}

impl Filter for HeaderFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        match self.kind {
            HeaderFilterKind::SetRequest => ctx.request.insert_header(&self.name, &self.value),
            HeaderFilterKind::AppendRequest => ctx.request.append_header(&self.name, &self.value),
            HeaderFilterKind::DropRequest => ctx.request.remove_header(&self.name),
            _ => {}
        }
    }

    fn on_response(&self, ctx: &mut FilterContext) {
        let Some(resp) = ctx.response.as_mut() else {
            return;
        };
        match self.kind {
            HeaderFilterKind::SetResponse => resp.insert_header(&self.name, &self.value),
            HeaderFilterKind::AppendResponse => resp.append_header(&self.name, &self.value),
            HeaderFilterKind::DropResponse => resp.remove_header(&self.name),
            _ => {}
        }
    }
}

struct HeaderSpec {
    kind: HeaderFilterKind,
}

impl FilterSpec for HeaderSpec {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        let value = if self.kind.takes_value() {
            expect_count(self.name(), args, 2)?;
            expect_string(self.name(), args, 1)?.to_string()
        } else {
            expect_count(self.name(), args, 1)?;
            String::new()
        };
        Ok(Arc::new(HeaderFilter {
            kind: self.kind,
            name: expect_string(self.name(), args, 0)?.to_string(),
            value,
        }))
    }
}

fn set_query_param(query: &str, name: &str, value: &str) -> String {
    let mut pairs: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| p.split_once('=').map(|(k, _)| k).unwrap_or(p) != name)
        .map(str::to_string)
        .collect();
    pairs.push(format!("{}={}", name, value));
    pairs.join("&")
}

fn drop_query_param(query: &str, name: &str) -> String {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| p.split_once('=').map(|(k, _)| k).unwrap_or(p) != name)
        .collect::<Vec<&str>>()
        .join("&")
}

/// `setQuery("name", "value")`.
struct SetQueryFilter {
    name: String,
    value: String,
}

impl Filter for SetQueryFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.request.query = set_query_param(&ctx.request.query, &self.name, &self.value);
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct SetQuerySpec;

impl FilterSpec for SetQuerySpec {
    fn name(&self) -> &'static str {
        "setQuery"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 2)?;
        Ok(Arc::new(SetQueryFilter {
            name: expect_string(self.name(), args, 0)?.to_string(),
            value: expect_string(self.name(), args, 1)?.to_string(),
        }))
    }
}

/// `dropQuery("name")`.
struct DropQueryFilter {
    name: String,
}

impl Filter for DropQueryFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.request.query = drop_query_param(&ctx.request.query, &self.name);
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct DropQuerySpec;

impl FilterSpec for DropQuerySpec {
    fn name(&self) -> &'static str {
        "dropQuery"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        Ok(Arc::new(DropQueryFilter {
            name: expect_string(self.name(), args, 0)?.to_string(),
        }))
    }
}

/// `redirectTo(308, "https://example.org/there")`: serves a redirect without
/// calling any backend.
struct RedirectToFilter {
    status: StatusCode,
    location: String,
}

impl Filter for RedirectToFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        let mut resp = GatewayResponse::new(self.status);
        resp.insert_header("location", &self.location);
        ctx.serve(resp);
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct RedirectToSpec;

impl FilterSpec for RedirectToSpec {
    fn name(&self) -> &'static str {
        "redirectTo"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 2)?;
        let status = status_from_number(self.name(), expect_number(self.name(), args, 0)?)?;
        if !status.is_redirection() {
            return Err(invalid_args(self.name(), "status must be a 3xx code"));
        }
        Ok(Arc::new(RedirectToFilter {
            status,
            location: expect_string(self.name(), args, 1)?.to_string(),
        }))
    }
}

/// `preserveHost(true)`: keep the incoming `Host` header on the upstream
/// request instead of the endpoint's authority.
struct PreserveHostFilter {
    preserve: bool,
}

impl Filter for PreserveHostFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.state
            .set(PRESERVE_HOST_KEY, StateValue::Bool(self.preserve));
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct PreserveHostSpec;

impl FilterSpec for PreserveHostSpec {
    fn name(&self) -> &'static str {
        "preserveHost"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        let preserve = args[0]
            .as_bool()
            .ok_or_else(|| invalid_args(self.name(), "expected a boolean"))?;
        Ok(Arc::new(PreserveHostFilter { preserve }))
    }
}

/// `setDynamicBackendUrl("http://backend:8080")`: selects the backend of a
/// `<dynamic>` route.
struct SetDynamicBackendUrlFilter {
    url: String,
}

impl Filter for SetDynamicBackendUrlFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.state
            .set(DYNAMIC_BACKEND_KEY, StateValue::Str(self.url.clone()));
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct SetDynamicBackendUrlSpec;

impl FilterSpec for SetDynamicBackendUrlSpec {
    fn name(&self) -> &'static str {
        "setDynamicBackendUrl"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        Ok(Arc::new(SetDynamicBackendUrlFilter {
            url: expect_string(self.name(), args, 0)?.to_string(),
        }))
    }
}

/// `flowId()` stamps a fresh flow id; `flowId("reuse")` keeps an incoming
/// one and only generates when absent.
struct FlowIdFilter {
    reuse: bool,
}

impl Filter for FlowIdFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        if self.reuse && ctx.request.header(FLOW_ID_HEADER).is_some() {
            return;
        }
        ctx.request
            .insert_header(FLOW_ID_HEADER, &flow_id::generate());
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct FlowIdSpec;

impl FilterSpec for FlowIdSpec {
    fn name(&self) -> &'static str {
        "flowId"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        let reuse = match args.len() {
            0 => false,
            1 => expect_string(self.name(), args, 0)? == "reuse",
            n => {
                return Err(invalid_args(
                    self.name(),
                    format!("expected 0 or 1 arguments, got {}", n),
                ))
            }
        };
        Ok(Arc::new(FlowIdFilter { reuse }))
    }
}

/// `backendTimeout("5s")`: sets this request's upstream deadline. The
/// engine takes it from the state bag in place of its global timeout.
struct BackendTimeoutFilter {
    timeout: Duration,
}

impl Filter for BackendTimeoutFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        ctx.state
            .set(BACKEND_TIMEOUT_KEY, StateValue::Duration(self.timeout));
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct BackendTimeoutSpec;

impl FilterSpec for BackendTimeoutSpec {
    fn name(&self) -> &'static str {
        "backendTimeout"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        Ok(Arc::new(BackendTimeoutFilter {
            timeout: parse_window(expect_string(self.name(), args, 0)?)?,
        }))
    }
}

/// `latency(100)`: fault injection, delays the request side by the given
/// number of milliseconds.
struct LatencyFilter {
    delay: Duration,
}

impl Filter for LatencyFilter {
    fn on_request(&self, _ctx: &mut FilterContext) {
        std::thread::sleep(self.delay);
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct LatencySpec;

impl FilterSpec for LatencySpec {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        expect_count(self.name(), args, 1)?;
        let ms = expect_number(self.name(), args, 0)?;
        if ms < 0.0 {
            return Err(invalid_args(self.name(), "delay must be non-negative"));
        }
        Ok(Arc::new(LatencyFilter {
            delay: Duration::from_millis(ms as u64),
        }))
    }
}

/// `ratelimit(10, "1m")` limits the whole route; `clientRatelimit(10, "1m")`
/// keys the limit by client address. An optional third argument names a
/// shared limiter group. Rejections are served as 429 with `Retry-After`.
struct RatelimitFilter {
    limiter: Arc<SlidingWindowLimiter>,
    per_client: bool,
}

impl Filter for RatelimitFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        let key = if self.per_client {
            ctx.request
                .source_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            String::new()
        };
        if self.limiter.allow(&key) {
            return;
        }
        let retry_after = self.limiter.retry_after(&key);
        ctx.metrics.incr("ratelimit.rejected");
        let mut resp = GatewayResponse::new(StatusCode::TOO_MANY_REQUESTS);
        resp.insert_header("retry-after", &retry_after.as_secs().max(1).to_string());
        ctx.serve(resp);
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct RatelimitSpec {
    registry: Arc<RatelimitRegistry>,
    per_client: bool,
}

impl FilterSpec for RatelimitSpec {
    fn name(&self) -> &'static str {
        if self.per_client {
            "clientRatelimit"
        } else {
            "ratelimit"
        }
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        if args.len() != 2 && args.len() != 3 {
            return Err(invalid_args(
                self.name(),
                format!("expected 2 or 3 arguments, got {}", args.len()),
            ));
        }
        let max_hits = expect_number(self.name(), args, 0)?;
        if max_hits < 1.0 || max_hits.fract() != 0.0 {
            return Err(invalid_args(self.name(), "max hits must be a positive integer"));
        }
        let window = parse_window(expect_string(self.name(), args, 1)?)?;
        let group = if args.len() == 3 {
            expect_string(self.name(), args, 2)?.to_string()
        } else {
            // Unshared by default; a unique group per filter instance.
            format!("{}-{}", self.name(), uuid::Uuid::new_v4().simple())
        };
        Ok(Arc::new(RatelimitFilter {
            limiter: self.registry.get(&group, max_hits as usize, window),
            per_client: self.per_client,
        }))
    }
}

/// `blockContent("pattern", ...)`: rejects requests whose body contains one
/// of the literal patterns. A trailing number caps the scan buffer, a
/// trailing `true` switches to best-effort mode, which lets oversized
/// bodies through unscanned instead of rejecting them.
struct BlockContentFilter {
    matcher: ContentMatcher,
}

impl Filter for BlockContentFilter {
    fn on_request(&self, ctx: &mut FilterContext) {
        match self.matcher.scan(&ctx.request.body) {
            ScanOutcome::Clean => {}
            ScanOutcome::Matched(_) => {
                ctx.metrics.incr("block.matched");
                ctx.serve(GatewayResponse::new(StatusCode::BAD_REQUEST));
            }
            ScanOutcome::TooLarge => {
                ctx.metrics.incr("block.too_large");
                ctx.serve(GatewayResponse::new(StatusCode::PAYLOAD_TOO_LARGE));
            }
        }
    }

    fn on_response(&self, _ctx: &mut FilterContext) {}
}

struct BlockContentSpec;

impl FilterSpec for BlockContentSpec {
    fn name(&self) -> &'static str {
        "blockContent"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Filter>, ConfigError> {
        let mut patterns = Vec::new();
        let mut max_buffer = DEFAULT_MAX_BUFFER_SIZE;
        let mut policy = OverflowPolicy::Abort;
        for arg in args {
            match arg {
                ArgValue::Str(s) => patterns.push(s.clone().into_bytes()),
                ArgValue::Number(n) => {
                    if *n < 1.0 || n.fract() != 0.0 {
                        return Err(invalid_args(
                            self.name(),
                            "buffer size must be a positive integer",
                        ));
                    }
                    max_buffer = *n as usize;
                }
                ArgValue::Bool(best_effort) => {
                    policy = if *best_effort {
                        OverflowPolicy::BestEffort
                    } else {
                        OverflowPolicy::Abort
                    };
                }
                other => {
                    return Err(invalid_args(
                        self.name(),
                        format!("unexpected {} argument", other.type_name()),
                    ))
                }
            }
        }
        if patterns.is_empty() {
            return Err(invalid_args(self.name(), "expected at least one pattern"));
        }
        Ok(Arc::new(BlockContentFilter {
            matcher: ContentMatcher::new(patterns, max_buffer, policy),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterMetrics, FilterRegistry};
    use crate::models::exchange::GatewayRequest;
    use actix_web::http::header::HeaderMap;
    use actix_web::http::Method;

    fn context() -> FilterContext {
        let request = GatewayRequest {
            method: Method::GET,
            path: "/a".to_string(),
            query: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer_ip: Some("10.0.0.1".parse().unwrap()),
            host: "example.org".to_string(),
            scheme: "http".to_string(),
        };
        FilterContext::new(request, Arc::new(FilterMetrics::new()))
    }

    fn create(name: &str, args: &[ArgValue]) -> Arc<dyn Filter> {
        FilterRegistry::with_builtins().create(name, args).unwrap()
    }

    #[test]
    fn status_seeds_the_response_for_shunts() {
        let f = create("status", &[ArgValue::Number(418.0)]);
        let mut ctx = context();
        f.on_request(&mut ctx);
        assert!(!ctx.is_served());
        assert_eq!(
            ctx.response.as_ref().unwrap().status,
            StatusCode::IM_A_TEAPOT
        );
    }

    #[test]
    fn set_request_header_last_write_wins() {
        let a = create(
            "setRequestHeader",
            &[ArgValue::Str("X".into()), ArgValue::Str("a".into())],
        );
        let b = create(
            "setRequestHeader",
            &[ArgValue::Str("X".into()), ArgValue::Str("b".into())],
        );
        let mut ctx = context();
        a.on_request(&mut ctx);
        b.on_request(&mut ctx);
        let values: Vec<&str> = ctx
            .request
            .headers
            .get_all("x")
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["b"]);
    }

    #[test]
    fn append_request_header_keeps_both_values() {
        let a = create(
            "appendRequestHeader",
            &[ArgValue::Str("X".into()), ArgValue::Str("a".into())],
        );
        let b = create(
            "appendRequestHeader",
            &[ArgValue::Str("X".into()), ArgValue::Str("b".into())],
        );
        let mut ctx = context();
        a.on_request(&mut ctx);
        b.on_request(&mut ctx);
        assert_eq!(ctx.request.headers.get_all("x").count(), 2);
    }

    #[test]
    fn mod_path_rewrites_with_captures() {
        let f = create(
            "modPath",
            &[
                ArgValue::Regex("^/api/v1/(.*)$".into()),
                ArgValue::Str("/$1".into()),
            ],
        );
        let mut ctx = context();
        ctx.request.path = "/api/v1/users".to_string();
        f.on_request(&mut ctx);
        assert_eq!(ctx.request.path, "/users");
    }

    #[test]
    fn query_filters_edit_the_raw_query() {
        assert_eq!(set_query_param("", "a", "1"), "a=1");
        assert_eq!(set_query_param("a=0&b=2", "a", "1"), "b=2&a=1");
        assert_eq!(drop_query_param("a=1&b=2", "a"), "b=2");
        assert_eq!(drop_query_param("a=1", "a"), "");
    }

    #[test]
    fn redirect_serves_immediately() {
        let f = create(
            "redirectTo",
            &[
                ArgValue::Number(308.0),
                ArgValue::Str("https://example.org/x".into()),
            ],
        );
        let mut ctx = context();
        f.on_request(&mut ctx);
        assert!(ctx.is_served());
        let resp = ctx.response.as_ref().unwrap();
        assert_eq!(resp.status, StatusCode::PERMANENT_REDIRECT);
        assert_eq!(resp.header("location"), Some("https://example.org/x"));

        assert!(FilterRegistry::with_builtins()
            .create(
                "redirectTo",
                &[ArgValue::Number(200.0), ArgValue::Str("/x".into())]
            )
            .is_err());
    }

    #[test]
    fn flow_id_reuse_keeps_an_existing_id() {
        let fresh = create("flowId", &[]);
        let reuse = create("flowId", &[ArgValue::Str("reuse".into())]);

        let mut ctx = context();
        ctx.request.insert_header(FLOW_ID_HEADER, "keepme");
        reuse.on_request(&mut ctx);
        assert_eq!(ctx.request.header(FLOW_ID_HEADER), Some("keepme"));
        fresh.on_request(&mut ctx);
        assert_ne!(ctx.request.header(FLOW_ID_HEADER), Some("keepme"));
    }

    #[test]
    fn ratelimit_serves_429_with_retry_after() {
        let f = create("ratelimit", &[ArgValue::Number(1.0), ArgValue::Str("1m".into())]);
        let mut ctx = context();
        f.on_request(&mut ctx);
        assert!(!ctx.is_served());

        let mut ctx = context();
        f.on_request(&mut ctx);
        assert!(ctx.is_served());
        let resp = ctx.response.as_ref().unwrap();
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.header("retry-after").is_some());
    }

    #[test]
    fn block_content_rejects_matching_bodies() {
        let f = create("blockContent", &[ArgValue::Str("forbidden".into())]);
        let mut ctx = context();
        ctx.request.body = Bytes::from_static(b"entirely fine");
        f.on_request(&mut ctx);
        assert!(!ctx.is_served());

        let mut ctx = context();
        ctx.request.body = Bytes::from_static(b"this is forbidden content");
        f.on_request(&mut ctx);
        assert!(ctx.is_served());
        assert_eq!(
            ctx.response.as_ref().unwrap().status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn block_content_best_effort_passes_oversized_bodies() {
        let abort = create(
            "blockContent",
            &[ArgValue::Str("x".into()), ArgValue::Number(4.0)],
        );
        let best_effort = create(
            "blockContent",
            &[
                ArgValue::Str("zzz".into()),
                ArgValue::Number(4.0),
                ArgValue::Bool(true),
            ],
        );
        let mut ctx = context();
        ctx.request.body = Bytes::from_static(b"aaaaaaaaaa");
        abort.on_request(&mut ctx);
        assert_eq!(
            ctx.response.as_ref().unwrap().status,
            StatusCode::PAYLOAD_TOO_LARGE
        );

        let mut ctx = context();
        ctx.request.body = Bytes::from_static(b"aaaaaaaaaa");
        best_effort.on_request(&mut ctx);
        assert!(!ctx.is_served());
    }
}
