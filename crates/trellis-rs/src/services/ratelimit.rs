//! Request rate limiting.
//!
//! Limiters expose one capability: `allow(key)` plus the two durations a
//! caller needs to build a `Retry-After` answer. The in-process
//! implementation keeps a sliding window of hit timestamps per key on the
//! local monotonic clock. Service-wide limiting uses a single fixed key;
//! per-client limiting keys by client address. Cluster-wide limiting over a
//! shared store is an external collaborator and not implemented here.

use crate::eskip::args::invalid_args;
use crate::models::error::ConfigError;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// The limiter capability shared by all variants.
pub trait Limiter: Send + Sync {
    /// Counts a hit for `key`; `false` means the caller must reject.
    fn allow(&self, key: &str) -> bool;

    /// How long until the next hit for `key` would be admitted.
    fn retry_after(&self, key: &str) -> Duration;

    /// Age of the oldest hit inside the window, mostly diagnostic.
    fn delta(&self, key: &str) -> Duration;
}

/// Sliding-window limiter: at most `max_hits` hits per `window` and key.
pub struct SlidingWindowLimiter {
    max_hits: usize,
    window: Duration,
    hits: Mutex<AHashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_hits: usize, window: Duration) -> Self {
        Self {
            max_hits,
            window,
            hits: Mutex::new(AHashMap::new()),
        }
    }

    fn prune(&self, hits: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Limiter for SlidingWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.hits.lock().expect("rate limiter lock poisoned");
        let hits = map.entry(key.to_string()).or_default();
        self.prune(hits, now);
        if hits.len() >= self.max_hits {
            return false;
        }
        hits.push_back(now);
        true
    }

    fn retry_after(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut map = self.hits.lock().expect("rate limiter lock poisoned");
        let Some(hits) = map.get_mut(key) else {
            return Duration::ZERO;
        };
        self.prune(hits, now);
        if hits.len() < self.max_hits {
            return Duration::ZERO;
        }
        match hits.front() {
            Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    fn delta(&self, key: &str) -> Duration {
        let now = Instant::now();
        let map = self.hits.lock().expect("rate limiter lock poisoned");
        map.get(key)
            .and_then(|hits| hits.front())
            .map(|oldest| now.duration_since(*oldest))
            .unwrap_or(Duration::ZERO)
    }
}

/// Shares limiter state between routes that name the same group, so one
/// logical limit can span several routes.
pub struct RatelimitRegistry {
    limiters: RwLock<AHashMap<String, Arc<SlidingWindowLimiter>>>,
}

impl RatelimitRegistry {
    pub fn new() -> Self {
        Self {
            limiters: RwLock::new(AHashMap::new()),
        }
    }

    /// Limiter for a group, created on first use. The first route to name a
    /// group fixes its parameters.
    pub fn get(&self, group: &str, max_hits: usize, window: Duration) -> Arc<SlidingWindowLimiter> {
        if let Some(limiter) = self
            .limiters
            .read()
            .expect("rate limit registry lock poisoned")
            .get(group)
        {
            return limiter.clone();
        }
        let mut limiters = self
            .limiters
            .write()
            .expect("rate limit registry lock poisoned");
        limiters
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(SlidingWindowLimiter::new(max_hits, window)))
            .clone()
    }
}

impl Default for RatelimitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses window literals such as `500ms`, `10s`, `1m`, `2h`.
pub fn parse_window(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid_args("ratelimit", format!("missing time unit in {:?}", raw)))?;
    let (value, unit) = raw.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| invalid_args("ratelimit", format!("invalid window {:?}", raw)))?;
    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => {
            return Err(invalid_args(
                "ratelimit",
                format!("unknown time unit in {:?}", raw),
            ))
        }
    };
    if duration.is_zero() {
        return Err(invalid_args("ratelimit", "window must be non-zero"));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_hits_per_window() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        // Other keys are independent.
        assert!(limiter.allow("other"));
    }

    #[test]
    fn window_expiry_readmits() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn retry_after_is_zero_until_saturated() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.retry_after("k"), Duration::ZERO);
        limiter.allow("k");
        assert_eq!(limiter.retry_after("k"), Duration::ZERO);
        limiter.allow("k");
        assert!(limiter.retry_after("k") > Duration::from_secs(50));
        assert!(limiter.delta("k") < Duration::from_secs(1));
    }

    #[test]
    fn registry_shares_groups() {
        let registry = RatelimitRegistry::new();
        let a = registry.get("g", 5, Duration::from_secs(1));
        let b = registry.get("g", 99, Duration::from_secs(9));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn window_literals() {
        assert_eq!(parse_window("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_window("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_window("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_window("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_window("10").is_err());
        assert!(parse_window("10x").is_err());
        assert!(parse_window("0s").is_err());
    }
}
