//! Circuit breakers protecting upstream calls.
//!
//! One breaker exists per `(host, route)` pair, created lazily by the
//! [`BreakerRegistry`]. The state machine is the usual
//! closed -> open -> half-open -> closed cycle. Two tripping variants share
//! the same storage: consecutive failures, and failure rate over a sliding
//! count window.

use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests pass through.
    Closed = 0,
    /// Tripped; requests fail fast until the reset timeout elapses.
    Open = 1,
    /// Probing recovery with live traffic.
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Breaker parameters; `window` switches from the consecutive-failure
/// variant to the rate-window variant.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub reset_timeout: Duration,
    /// When set, trip if at least `failure_threshold` of the last `window`
    /// attempts failed, instead of on consecutive failures.
    pub window: Option<u64>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            window: None,
        }
    }
}

/// A single breaker instance.
pub struct CircuitBreaker {
    key: String,
    settings: BreakerSettings,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    half_open_successes: AtomicU64,
    window_total: AtomicU64,
    window_failed: AtomicU64,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(key: String, settings: BreakerSettings) -> Arc<Self> {
        Arc::new(Self {
            key,
            settings,
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            window_total: AtomicU64::new(0),
            window_failed: AtomicU64::new(0),
            opened_at: RwLock::new(None),
        })
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a request may pass. An open breaker transitions to half-open
    /// once the reset timeout has elapsed.
    pub fn allow(&self) -> bool {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .read()
                    .expect("breaker lock poisoned")
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.settings.reset_timeout {
                    self.state
                        .store(BreakerState::HalfOpen as u8, Ordering::Release);
                    self.half_open_successes.store(0, Ordering::Release);
                    info!("circuit breaker half-open: {}", self.key);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.push_window(false);
        match self.state() {
            BreakerState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.settings.success_threshold {
                    self.reset();
                    info!("circuit breaker closed: {}", self.key);
                }
            }
            _ => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
        }
    }

    pub fn record_failure(&self) {
        self.push_window(true);
        match self.state() {
            BreakerState::HalfOpen => {
                // A failure during probing re-opens immediately.
                self.trip();
            }
            BreakerState::Closed => {
                let tripped = if self.settings.window.is_some() {
                    self.window_ratio_exceeded()
                } else {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    failures >= self.settings.failure_threshold
                };
                if tripped {
                    self.trip();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn push_window(&self, failed: bool) {
        let Some(window) = self.settings.window else {
            return;
        };
        let total = self.window_total.fetch_add(1, Ordering::AcqRel) + 1;
        if failed {
            self.window_failed.fetch_add(1, Ordering::AcqRel);
        }
        // Count-based window: restart once it is full.
        if total >= window {
            self.window_total.store(0, Ordering::Release);
            self.window_failed.store(0, Ordering::Release);
        }
    }

    fn window_ratio_exceeded(&self) -> bool {
        self.window_failed.load(Ordering::Acquire) >= self.settings.failure_threshold
    }

    fn trip(&self) {
        self.state.store(BreakerState::Open as u8, Ordering::Release);
        *self.opened_at.write().expect("breaker lock poisoned") = Some(Instant::now());
        warn!("circuit breaker open: {}", self.key);
    }

    fn reset(&self) {
        self.state
            .store(BreakerState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        self.window_total.store(0, Ordering::Release);
        self.window_failed.store(0, Ordering::Release);
        *self.opened_at.write().expect("breaker lock poisoned") = None;
    }
}

/// Lazily creates and hands out breakers per `(host, route)`.
pub struct BreakerRegistry {
    breakers: RwLock<AHashMap<String, Arc<CircuitBreaker>>>,
    settings: BreakerSettings,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: RwLock::new(AHashMap::new()),
            settings,
        }
    }

    pub fn get(&self, host: &str, route_id: &str) -> Arc<CircuitBreaker> {
        let key = format!("{}|{}", host, route_id);
        if let Some(breaker) = self
            .breakers
            .read()
            .expect("breaker registry lock poisoned")
            .get(&key)
        {
            return breaker.clone();
        }
        let mut breakers = self
            .breakers
            .write()
            .expect("breaker registry lock poisoned");
        breakers
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(key, self.settings.clone()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(reset_ms: u64) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(reset_ms),
            window: None,
        }
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("b:80|r".into(), settings(30_000));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_the_consecutive_count() {
        let breaker = CircuitBreaker::new("b:80|r".into(), settings(30_000));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn recovers_through_half_open() {
        let breaker = CircuitBreaker::new("b:80|r".into(), settings(0));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        // Reset timeout of zero: the next allow() probes immediately.
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("b:80|r".into(), settings(0));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn rate_window_variant_trips_within_the_window() {
        let breaker = CircuitBreaker::new(
            "b:80|r".into(),
            BreakerSettings {
                failure_threshold: 3,
                success_threshold: 1,
                reset_timeout: Duration::from_secs(30),
                window: Some(10),
            },
        );
        // Interleaved successes keep a consecutive counter at bay, but the
        // window still accumulates failures.
        for _ in 0..2 {
            breaker.record_failure();
            breaker.record_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn registry_shares_instances_per_host_route() {
        let registry = BreakerRegistry::new(BreakerSettings::default());
        let a = registry.get("b:80", "r1");
        let b = registry.get("b:80", "r1");
        let c = registry.get("b:80", "r2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
