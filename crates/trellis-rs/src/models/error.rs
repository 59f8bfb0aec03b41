use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

use crate::models::exchange::GatewayResponse;

/// Errors raised while constructing routes, predicates, or filters from
/// definitions.
///
/// These surface at table-build time (or through the admission endpoints) and
/// never fail an in-flight request: an invalid route is dropped and the rest
/// of the table is installed.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),
    #[error("unknown filter: {0}")]
    UnknownFilter(String),
    #[error("invalid arguments for {name}: {reason}")]
    InvalidArgs { name: String, reason: String },
    #[error("invalid backend: {0}")]
    InvalidBackend(String),
    #[error("invalid route {id}: {reason}")]
    InvalidRoute { id: String, reason: String },
}

impl ConfigError {
    /// Short reason keyword used for invalid-route metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownPredicate(_) => "unknown_predicate",
            Self::UnknownFilter(_) => "unknown_filter",
            Self::InvalidArgs { .. } => "invalid_args",
            Self::InvalidBackend(_) => "invalid_backend",
            Self::InvalidRoute { .. } => "invalid_route",
        }
    }
}

/// Request-time gateway errors.
///
/// Each variant maps to the HTTP status the client receives: match misses
/// become 404, upstream connection failures 502, exhausted or gated endpoint
/// sets 503, deadlines 504, loop-limit and internal errors 500, and rate
/// limiting 429 with a `Retry-After` header.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route matches path: {path}")]
    RouteNotFound { path: String },
    #[error("upstream request failed: {message}")]
    Upstream { message: String, url: String },
    #[error("all endpoints unhealthy for route: {route}")]
    NoHealthyEndpoints { route: String },
    #[error("no endpoints configured for route: {route}")]
    NoEndpoints { route: String },
    #[error("upstream request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("loopback depth exceeded on route: {route}")]
    LoopLimit { route: String },
    #[error("rate limit exceeded")]
    RateLimit { retry_after_secs: u64 },
    #[error("dynamic backend not set by any filter on route: {route}")]
    MissingDynamicBackend { route: String },
    #[error("circuit open for upstream: {service}")]
    CircuitOpen { service: String },
    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::NoHealthyEndpoints { .. } | Self::CircuitOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::NoEndpoints { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::LoopLimit { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MissingDynamicBackend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream",
            Self::NoHealthyEndpoints { .. } => "unhealthy",
            Self::NoEndpoints { .. } => "no_endpoints",
            Self::Timeout { .. } => "timeout",
            Self::LoopLimit { .. } => "loop_limit",
            Self::RateLimit { .. } => "rate_limit",
            Self::MissingDynamicBackend { .. } => "dynamic_backend",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Internal(_) => "internal",
        }
    }

    /// Renders the error as a response object so the filter chain's response
    /// side can still run over it.
    pub fn to_response(&self) -> GatewayResponse {
        let body = json!({
            "error": self.to_string(),
            "type": self.kind(),
        });
        let mut resp = GatewayResponse::with_json(self.status(), &body);
        if let Self::RateLimit { retry_after_secs } = self {
            resp.insert_header("retry-after", &retry_after_secs.to_string());
        }
        resp
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        self.to_response().into_http_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(
            GatewayError::RouteNotFound { path: "/x".into() }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Upstream {
                message: "connection refused".into(),
                url: "http://a".into()
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Timeout { timeout_secs: 30 }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::NoHealthyEndpoints { route: "r".into() }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::LoopLimit { route: "r".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limit_response_carries_retry_after() {
        let resp = GatewayError::RateLimit { retry_after_secs: 7 }.to_response();
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.header("retry-after"), Some("7"));
    }
}
