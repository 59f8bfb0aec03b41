use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::services::endpoint_registry::PassiveHealthSettings;
use crate::services::load_balancer::FadeInSettings;

/// Traffic fade-in configuration for newly detected endpoints.
///
/// While an endpoint's age is below `duration_secs`, its selection weight is
/// scaled by `(age / duration) ^ exponent`. A duration of 0 disables fade-in.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FadeInConfig {
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default = "default_fade_in_exponent")]
    pub exponent: f64,
}

fn default_fade_in_exponent() -> f64 {
    1.0
}

impl Default for FadeInConfig {
    fn default() -> Self {
        Self {
            duration_secs: 0,
            exponent: default_fade_in_exponent(),
        }
    }
}

impl FadeInConfig {
    pub fn to_runtime(&self) -> FadeInSettings {
        FadeInSettings {
            duration: Duration::from_secs(self.duration_secs),
            exponent: self.exponent,
        }
    }
}

/// Passive health check configuration.
///
/// Every `period_secs` the endpoint registry computes each endpoint's failure
/// ratio over the previous counter slot. Endpoints with at least
/// `min_requests` in the slot and a ratio at or above `failure_threshold`
/// get a drop probability interpolated linearly between
/// `min_drop_probability` and `max_drop_probability`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PassiveHealthConfig {
    #[serde(default = "default_health_period")]
    pub period_secs: u64,
    #[serde(default = "default_health_min_requests")]
    pub min_requests: u64,
    #[serde(default = "default_health_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default)]
    pub min_drop_probability: f64,
    #[serde(default = "default_health_max_drop_probability")]
    pub max_drop_probability: f64,
}

fn default_health_period() -> u64 {
    30
}

fn default_health_min_requests() -> u64 {
    10
}

fn default_health_failure_threshold() -> f64 {
    0.5
}

fn default_health_max_drop_probability() -> f64 {
    0.95
}

impl Default for PassiveHealthConfig {
    fn default() -> Self {
        Self {
            period_secs: default_health_period(),
            min_requests: default_health_min_requests(),
            failure_threshold: default_health_failure_threshold(),
            min_drop_probability: 0.0,
            max_drop_probability: default_health_max_drop_probability(),
        }
    }
}

impl PassiveHealthConfig {
    pub fn to_runtime(&self) -> PassiveHealthSettings {
        PassiveHealthSettings {
            period: Duration::from_secs(self.period_secs),
            min_requests: self.min_requests,
            failure_threshold: self.failure_threshold,
            min_drop_probability: self.min_drop_probability,
            max_drop_probability: self.max_drop_probability,
        }
    }
}

/// Circuit breaker configuration for upstream calls.
///
/// When `window` is set the breaker trips on the failure ratio over the last
/// `window` attempts instead of a consecutive-failure count.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_failures")]
    pub failure_threshold: u64,
    #[serde(default = "default_breaker_successes")]
    pub success_threshold: u64,
    #[serde(default = "default_breaker_reset")]
    pub reset_timeout_secs: u64,
    #[serde(default)]
    pub window: Option<u64>,
}

fn default_breaker_failures() -> u64 {
    5
}

fn default_breaker_successes() -> u64 {
    3
}

fn default_breaker_reset() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failures(),
            success_threshold: default_breaker_successes(),
            reset_timeout_secs: default_breaker_reset(),
            window: None,
        }
    }
}

/// Application configuration for the trellis gateway.
///
/// Loaded from a JSON file (`TRELLIS_CONFIG_PATH`, default `config.json`).
/// Routes themselves come from the route definition file named by
/// `routes_file`, or inline from `routes`; both use the route definition
/// grammar.
///
/// # Configuration File Format
///
/// ```json
/// {
///   "version": 1,
///   "routes_file": "routes.eskip",
///   "poll_interval_secs": 3,
///   "timeout_secs": 30,
///   "fade_in": {"duration_secs": 180, "exponent": 1.5},
///   "passive_health": {"period_secs": 30, "failure_threshold": 0.5},
///   "default_filters": {"payments:8080": "setRequestHeader(\"X-Tier\", \"internal\")"}
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    /// Configuration schema version for compatibility checking.
    pub version: u8,

    /// Path to the route definition file polled by the file data client.
    #[serde(default)]
    pub routes_file: Option<String>,

    /// Inline route definitions; mostly useful for tests and small setups.
    #[serde(default)]
    pub routes: Option<String>,

    /// Routing table refresh interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Generate `X-Flow-Id` for requests that do not carry one.
    #[serde(default = "default_true")]
    pub flow_id: bool,

    /// When every endpoint of a load-balanced route is gated by the passive
    /// health check, still try one (`true`) or fail with 503 (`false`).
    #[serde(default = "default_true")]
    pub fail_open: bool,

    #[serde(default)]
    pub fade_in: FadeInConfig,

    #[serde(default)]
    pub passive_health: PassiveHealthConfig,

    /// Endpoint stats entries unreferenced for this long are reaped.
    #[serde(default = "default_last_seen_timeout")]
    pub last_seen_timeout_secs: u64,

    /// Grace period before filters of a replaced table are closed.
    #[serde(default = "default_drain_grace")]
    pub drain_grace_secs: u64,

    /// Id of the route served when nothing matches, if any.
    #[serde(default)]
    pub default_route_id: Option<String>,

    /// Balance factor for the consistent hash algorithm: endpoints loaded
    /// beyond `factor * average inflight` are passed over in ring order.
    #[serde(default)]
    pub consistent_hash_balance_factor: Option<f64>,

    /// Filter chains prepended to every route whose backend resolves to the
    /// keyed `host:port` authority. Values use the grammar's filter chain
    /// form, e.g. `"f1() -> f2(42)"`.
    #[serde(default)]
    pub default_filters: HashMap<String, String>,

    /// Optional circuit breaker for upstream calls, keyed per (host, route).
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,
}

fn default_poll_interval() -> u64 {
    3
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_last_seen_timeout() -> u64 {
    60
}

fn default_drain_grace() -> u64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            routes_file: None,
            routes: None,
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
            flow_id: true,
            fail_open: true,
            fade_in: FadeInConfig::default(),
            passive_health: PassiveHealthConfig::default(),
            last_seen_timeout_secs: default_last_seen_timeout(),
            drain_grace_secs: default_drain_grace(),
            default_route_id: None,
            consistent_hash_balance_factor: None,
            default_filters: HashMap::new(),
            breaker: None,
        }
    }
}

impl Settings {
    /// Validates settings for internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.fade_in.exponent <= 0.0 {
            return Err("fade_in.exponent must be greater than 0".to_string());
        }
        let ph = &self.passive_health;
        if !(0.0..=1.0).contains(&ph.failure_threshold) {
            return Err("passive_health.failure_threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&ph.min_drop_probability)
            || !(0.0..=1.0).contains(&ph.max_drop_probability)
        {
            return Err("passive_health drop probabilities must be within [0, 1]".to_string());
        }
        if ph.min_drop_probability > ph.max_drop_probability {
            return Err(
                "passive_health.min_drop_probability cannot exceed max_drop_probability"
                    .to_string(),
            );
        }
        if self.routes_file.is_none() && self.routes.is_none() {
            return Err("either routes_file or routes must be configured".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_routes_are_set() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_err());
        settings.routes = Some(r#"r: * -> <shunt>;"#.to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn inconsistent_health_probabilities_are_rejected() {
        let mut settings = Settings {
            routes: Some("r: * -> <shunt>;".to_string()),
            ..Settings::default()
        };
        settings.passive_health.min_drop_probability = 0.9;
        settings.passive_health.max_drop_probability = 0.2;
        assert!(settings.validate().is_err());
    }
}
