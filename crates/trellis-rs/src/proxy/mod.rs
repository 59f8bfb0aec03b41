//! The proxy engine: the HTTP handler tying matcher, filters, balancer,
//! and upstream client together.
//!
//! Per request: pin the current routing table, match a route, run the
//! request filter chain (honoring `serve` short-circuits), resolve the
//! backend (network, shunt, loopback, dynamic, or load balanced), forward
//! upstream with timeout and error classification, then unwind the
//! response side of exactly the filters that ran, in reverse order.
//!
//! Loopback routes re-match the possibly rewritten request against the
//! same pinned table; the loop depth is bounded at [`MAX_LOOPBACKS`].
//! Errors become regular response objects before the unwind, so response
//! filters and access logging also cover failures.

use crate::filters::{
    Filter, FilterContext, FilterMetrics, StateValue, BACKEND_TIMEOUT_KEY, DYNAMIC_BACKEND_KEY,
    PRESERVE_HOST_KEY,
};
use crate::models::error::GatewayError;
use crate::models::exchange::{GatewayRequest, GatewayResponse};
use crate::models::route::{Backend, Endpoint, Route};
use crate::routing::table::{RoutingTable, TableHolder};
use crate::services::circuit_breaker::{BreakerRegistry, BreakerSettings};
use crate::services::endpoint_registry::EndpointStats;
use crate::services::load_balancer::{FadeInSettings, Selection};
use crate::utils::flow_id::{self, FLOW_ID_HEADER};
use crate::utils::path::build_upstream_url;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse};
use log::{debug, warn};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on loopback re-matches for one request.
pub const MAX_LOOPBACKS: usize = 9;

/// Engine configuration derived from
/// [`Settings`](crate::models::settings::Settings).
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub timeout: Duration,
    /// Generate `X-Flow-Id` on upstream requests that lack one.
    pub flow_id: bool,
    /// All endpoints health-gated: still try one (`true`) or answer 503.
    pub fail_open: bool,
    pub fade_in: FadeInSettings,
    pub breaker: Option<BreakerSettings>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            flow_id: true,
            fail_open: true,
            fade_in: FadeInSettings::default(),
            breaker: None,
        }
    }
}

/// Engine-level counters for the metrics endpoint.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    total: AtomicU64,
    served_by_filters: AtomicU64,
    not_found: AtomicU64,
    upstream_errors: AtomicU64,
    loop_limited: AtomicU64,
}

impl ProxyMetrics {
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("requests.total", self.total.load(Ordering::Relaxed)),
            (
                "requests.served_by_filters",
                self.served_by_filters.load(Ordering::Relaxed),
            ),
            ("requests.not_found", self.not_found.load(Ordering::Relaxed)),
            (
                "requests.upstream_errors",
                self.upstream_errors.load(Ordering::Relaxed),
            ),
            (
                "requests.loop_limited",
                self.loop_limited.load(Ordering::Relaxed),
            ),
        ]
    }
}

// Headers owned by the connection, never forwarded. Content-Length is
// recomputed from the forwarded body, which filters may have replaced.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// The request handler of the proxy.
pub struct ProxyEngine {
    client: Client,
    holder: Arc<TableHolder>,
    settings: ProxySettings,
    breakers: Option<BreakerRegistry>,
    filter_metrics: Arc<FilterMetrics>,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyEngine {
    pub fn new(holder: Arc<TableHolder>, settings: ProxySettings) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("failed to create upstream HTTP client");
        let breakers = settings
            .breaker
            .clone()
            .map(BreakerRegistry::new);
        Self {
            client,
            holder,
            settings,
            breakers,
            filter_metrics: Arc::new(FilterMetrics::new()),
            metrics: Arc::new(ProxyMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        self.metrics.clone()
    }

    pub fn filter_metrics(&self) -> Arc<FilterMetrics> {
        self.filter_metrics.clone()
    }

    /// Entry point bound to the catch-all resource.
    pub async fn handle_request(&self, req: HttpRequest, body: Bytes) -> HttpResponse {
        let started = Instant::now();
        self.metrics.total.fetch_add(1, Ordering::Relaxed);

        // Pin one table for the whole exchange; a concurrent swap must not
        // change what this request sees.
        let table = self.holder.load();
        let request = GatewayRequest::from_http(&req, body);
        let method = request.method.clone();
        let path = request.path.clone();

        let response = self.process(&table, request).await;
        debug!(
            "{} {} -> {} ({} ms, table v{})",
            method,
            path,
            response.status.as_u16(),
            started.elapsed().as_millis(),
            table.version,
        );
        response.into_http_response()
    }

    async fn process(&self, table: &RoutingTable, request: GatewayRequest) -> GatewayResponse {
        let mut ctx = FilterContext::new(request, self.filter_metrics.clone());
        let mut entered: Vec<Arc<dyn Filter>> = Vec::new();
        let mut loops = 0usize;

        let failure: Option<GatewayError> = loop {
            let Some(matched) = table.matcher.lookup(&ctx.request) else {
                self.metrics.not_found.fetch_add(1, Ordering::Relaxed);
                break Some(GatewayError::RouteNotFound {
                    path: ctx.request.path.clone(),
                });
            };
            let route = matched.route;
            ctx.set_params(matched.params);

            for filter in &route.filters {
                filter.on_request(&mut ctx);
                entered.push(filter.clone());
                if ctx.is_served() {
                    break;
                }
            }
            if ctx.is_served() {
                self.metrics.served_by_filters.fetch_add(1, Ordering::Relaxed);
                break None;
            }

            match &route.backend {
                Backend::Shunt => {
                    if ctx.response.is_none() {
                        ctx.response = Some(GatewayResponse::not_found());
                    }
                    self.metrics.served_by_filters.fetch_add(1, Ordering::Relaxed);
                    break None;
                }
                Backend::Loopback => {
                    loops += 1;
                    if loops > MAX_LOOPBACKS {
                        self.metrics.loop_limited.fetch_add(1, Ordering::Relaxed);
                        warn!("loopback limit exceeded on route {}", route.id);
                        break Some(GatewayError::LoopLimit {
                            route: route.id.clone(),
                        });
                    }
                    continue;
                }
                Backend::Network(url) => {
                    let endpoint = match Endpoint::parse(url) {
                        Ok(endpoint) => endpoint,
                        Err(e) => break Some(GatewayError::Internal(e.to_string())),
                    };
                    let stats = table.registry.touch(&endpoint.key());
                    break self.call_endpoint(&route, &endpoint, stats, &mut ctx).await;
                }
                Backend::Dynamic => {
                    let Some(url) = ctx.state.get_str(DYNAMIC_BACKEND_KEY).map(str::to_string)
                    else {
                        break Some(GatewayError::MissingDynamicBackend {
                            route: route.id.clone(),
                        });
                    };
                    let endpoint = match Endpoint::parse(&url) {
                        Ok(endpoint) => endpoint,
                        Err(e) => break Some(GatewayError::Internal(e.to_string())),
                    };
                    let stats = table.registry.touch(&endpoint.key());
                    break self.call_endpoint(&route, &endpoint, stats, &mut ctx).await;
                }
                Backend::LoadBalanced { endpoints, .. } => {
                    let Some(binding) = route.lb.as_ref() else {
                        break Some(GatewayError::Internal(
                            "load balancer state not bound".to_string(),
                        ));
                    };
                    let key = ctx.request.source_ip().map(|ip| ip.to_string());
                    let selection = binding.balancer.select(
                        &binding.stats,
                        key.as_deref(),
                        &self.settings.fade_in,
                    );
                    let idx = match selection {
                        Selection::Chosen(idx) => idx,
                        Selection::AllUnhealthy(idx) if self.settings.fail_open => {
                            debug!(
                                "all endpoints unhealthy on route {}; failing open",
                                route.id
                            );
                            idx
                        }
                        Selection::AllUnhealthy(_) => {
                            break Some(GatewayError::NoHealthyEndpoints {
                                route: route.id.clone(),
                            });
                        }
                        Selection::Empty => {
                            break Some(GatewayError::NoEndpoints {
                                route: route.id.clone(),
                            });
                        }
                    };
                    let stats = binding.stats[idx].clone();
                    break self
                        .call_endpoint(&route, &endpoints[idx], stats, &mut ctx)
                        .await;
                }
            }
        };

        if let Some(error) = failure {
            ctx.response = Some(error.to_response());
        }

        for filter in entered.iter().rev() {
            filter.on_response(&mut ctx);
        }
        ctx.response.take().unwrap_or_else(GatewayResponse::not_found)
    }

    /// One upstream attempt with inflight and round-trip accounting on all
    /// exit paths.
    async fn call_endpoint(
        &self,
        route: &Route,
        endpoint: &Endpoint,
        stats: Arc<EndpointStats>,
        ctx: &mut FilterContext,
    ) -> Option<GatewayError> {
        let breaker = self
            .breakers
            .as_ref()
            .map(|b| b.get(&endpoint.key(), &route.id));
        if let Some(breaker) = &breaker {
            if !breaker.allow() {
                return Some(GatewayError::CircuitOpen {
                    service: endpoint.key(),
                });
            }
        }

        stats.inc_inflight();
        let result = self.send_upstream(endpoint, ctx).await;
        stats.dec_inflight();
        stats.inc_requests(result.is_err());

        match result {
            Ok(response) => {
                if let Some(breaker) = &breaker {
                    breaker.record_success();
                }
                ctx.response = Some(response);
                None
            }
            Err(error) => {
                if let Some(breaker) = &breaker {
                    breaker.record_failure();
                }
                self.metrics.upstream_errors.fetch_add(1, Ordering::Relaxed);
                warn!("upstream call failed on route {}: {}", route.id, error);
                Some(error)
            }
        }
    }

    async fn send_upstream(
        &self,
        endpoint: &Endpoint,
        ctx: &FilterContext,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = build_upstream_url(&endpoint.base_url(), &ctx.request.path, &ctx.request.query);
        let method = reqwest::Method::from_bytes(ctx.request.method.as_str().as_bytes())
            .map_err(|_| GatewayError::Internal("invalid request method".to_string()))?;
        let headers = self.build_upstream_headers(ctx);
        let timeout = ctx
            .state
            .get(BACKEND_TIMEOUT_KEY)
            .and_then(StateValue::as_duration)
            .unwrap_or(self.settings.timeout);
        debug!("forwarding to {}", url);

        let pending = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(ctx.request.body.to_vec());

        let response = match tokio::time::timeout(timeout, pending.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(if e.is_timeout() {
                    GatewayError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    }
                } else {
                    GatewayError::Upstream {
                        message: e.to_string(),
                        url,
                    }
                });
            }
            Err(_) => {
                return Err(GatewayError::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut result = GatewayResponse::new(status);
        for (name, value) in response.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                result.headers.append(name, value);
            }
        }
        result.body = response.bytes().await.map_err(|e| GatewayError::Upstream {
            message: e.to_string(),
            url,
        })?;
        Ok(result)
    }

    fn build_upstream_headers(&self, ctx: &FilterContext) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::with_capacity(ctx.request.headers.len() + 4);
        for (name, value) in ctx.request.headers.iter() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        let insert = |headers: &mut reqwest::header::HeaderMap, name: &'static str, value: &str| {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        };

        if let Some(ip) = ctx.request.peer_ip {
            let forwarded = match ctx.request.header("x-forwarded-for") {
                Some(existing) => format!("{}, {}", existing, ip),
                None => ip.to_string(),
            };
            insert(&mut headers, "x-forwarded-for", &forwarded);
        }
        insert(&mut headers, "x-forwarded-host", &ctx.original().host);
        insert(&mut headers, "x-forwarded-proto", &ctx.original().scheme);
        if self.settings.flow_id && ctx.request.header(FLOW_ID_HEADER).is_none() {
            insert(&mut headers, FLOW_ID_HEADER, &flow_id::generate());
        }
        // Hop-by-hop stripping removed Host; put the original back when a
        // filter asked for it.
        if ctx.state.get_bool(PRESERVE_HOST_KEY) == Some(true) {
            insert(&mut headers, "host", &ctx.original().host);
        }
        headers
    }
}
