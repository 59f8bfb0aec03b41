//! Per-endpoint stats: request counters, inflight gauge, passive health.
//!
//! The registry owns one [`EndpointStats`] per `host:port` key. Counters use
//! a two-slot scheme: all increments land in the active slot, and on every
//! rotation period the registry computes each endpoint's drop probability
//! from the slot that just closed, then swaps the active slot index with a
//! single atomic store. Readers never take a lock on the hot path; the only
//! lock is the read-mostly key map.
//!
//! Entries unreferenced for longer than the last-seen timeout are reaped by
//! the same maintenance loop.

use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Passive health check parameters, see
/// [`PassiveHealthConfig`](crate::models::settings::PassiveHealthConfig).
#[derive(Debug, Clone)]
pub struct PassiveHealthSettings {
    pub period: Duration,
    pub min_requests: u64,
    pub failure_threshold: f64,
    pub min_drop_probability: f64,
    pub max_drop_probability: f64,
}

impl Default for PassiveHealthSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            min_requests: 10,
            failure_threshold: 0.5,
            min_drop_probability: 0.0,
            max_drop_probability: 0.95,
        }
    }
}

/// Read-only view of one endpoint's current counters.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub failed: u64,
    pub inflight: u64,
    pub drop_probability: f64,
}

/// Process-wide stats of one upstream endpoint.
///
/// All mutation goes through atomics; instances are shared by every route
/// that references the same `host:port`.
pub struct EndpointStats {
    key: String,
    requests: [AtomicU64; 2],
    failed: [AtomicU64; 2],
    inflight: AtomicU64,
    detected: Instant,
    origin: Instant,
    last_seen_ms: AtomicU64,
    // f64 bits; written only by the rotation loop, read by the balancers.
    drop_probability: AtomicU64,
    active_slot: Arc<AtomicUsize>,
}

impl EndpointStats {
    fn new(key: String, origin: Instant, active_slot: Arc<AtomicUsize>) -> Self {
        let now_ms = origin.elapsed().as_millis() as u64;
        Self {
            key,
            requests: [AtomicU64::new(0), AtomicU64::new(0)],
            failed: [AtomicU64::new(0), AtomicU64::new(0)],
            inflight: AtomicU64::new(0),
            detected: Instant::now(),
            origin,
            last_seen_ms: AtomicU64::new(now_ms),
            drop_probability: AtomicU64::new(0f64.to_bits()),
            active_slot,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn inc_inflight(&self) {
        self.inflight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_inflight(&self) {
        // Saturating decrement; the gauge never goes below zero.
        let _ = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }

    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Acquire)
    }

    /// Counts one finished round trip in the active slot.
    pub fn inc_requests(&self, failed_round_trip: bool) {
        let slot = self.active_slot.load(Ordering::Acquire);
        self.requests[slot].fetch_add(1, Ordering::Relaxed);
        if failed_round_trip {
            self.failed[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn drop_probability(&self) -> f64 {
        f64::from_bits(self.drop_probability.load(Ordering::Acquire))
    }

    /// Time since the endpoint was first seen; drives fade-in.
    pub fn age(&self) -> Duration {
        self.detected.elapsed()
    }

    fn touch(&self) {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now_ms, Ordering::Release);
    }

    fn last_seen_age(&self) -> Duration {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now_ms.saturating_sub(self.last_seen_ms.load(Ordering::Acquire)))
    }

    fn metrics(&self) -> EndpointMetrics {
        let slot = self.active_slot.load(Ordering::Acquire);
        EndpointMetrics {
            requests: self.requests[slot].load(Ordering::Relaxed),
            failed: self.failed[slot].load(Ordering::Relaxed),
            inflight: self.inflight(),
            drop_probability: self.drop_probability(),
        }
    }
}

/// Owner of all endpoint stats, keyed by `host:port`.
pub struct EndpointRegistry {
    entries: RwLock<AHashMap<String, Arc<EndpointStats>>>,
    active_slot: Arc<AtomicUsize>,
    origin: Instant,
    health: PassiveHealthSettings,
    last_seen_timeout: Duration,
}

impl EndpointRegistry {
    pub fn new(health: PassiveHealthSettings, last_seen_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            active_slot: Arc::new(AtomicUsize::new(0)),
            origin: Instant::now(),
            health,
            last_seen_timeout,
        }
    }

    /// Idempotent lookup-or-create. Updates last-seen; sets the detection
    /// time on first sight.
    pub fn touch(&self, key: &str) -> Arc<EndpointStats> {
        if let Some(stats) = self
            .entries
            .read()
            .expect("endpoint registry lock poisoned")
            .get(key)
        {
            stats.touch();
            return stats.clone();
        }
        let mut entries = self.entries.write().expect("endpoint registry lock poisoned");
        let stats = entries.entry(key.to_string()).or_insert_with(|| {
            debug!("endpoint detected: {}", key);
            Arc::new(EndpointStats::new(
                key.to_string(),
                self.origin,
                self.active_slot.clone(),
            ))
        });
        stats.touch();
        stats.clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<EndpointStats>> {
        self.entries
            .read()
            .expect("endpoint registry lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn metrics(&self, key: &str) -> Option<EndpointMetrics> {
        self.get(key).map(|s| s.metrics())
    }

    /// Current counters of every known endpoint, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, EndpointMetrics)> {
        let entries = self.entries.read().expect("endpoint registry lock poisoned");
        let mut snapshot: Vec<(String, EndpointMetrics)> = entries
            .iter()
            .map(|(k, s)| (k.clone(), s.metrics()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("endpoint registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computes drop probabilities from the window that just ended, then
    /// swaps the counter slots. The swap is the single atomic store of the
    /// slot index; increments racing with it land in one slot or the other
    /// but never split an observation.
    pub fn rotate(&self) {
        let active = self.active_slot.load(Ordering::Acquire);
        let entries = self.entries.read().expect("endpoint registry lock poisoned");
        for stats in entries.values() {
            let total = stats.requests[active].load(Ordering::Relaxed);
            let failed = stats.failed[active].load(Ordering::Relaxed);
            let p = self.compute_drop_probability(total, failed);
            if p > 0.0 && stats.drop_probability() == 0.0 {
                info!(
                    "passive health: gating endpoint {} (failed {}/{}, p={:.2})",
                    stats.key, failed, total, p
                );
            }
            stats.drop_probability.store(p.to_bits(), Ordering::Release);
        }
        let next = active ^ 1;
        for stats in entries.values() {
            stats.requests[next].store(0, Ordering::Relaxed);
            stats.failed[next].store(0, Ordering::Relaxed);
        }
        drop(entries);
        self.active_slot.store(next, Ordering::Release);
    }

    fn compute_drop_probability(&self, total: u64, failed: u64) -> f64 {
        if total < self.health.min_requests || total == 0 {
            return 0.0;
        }
        let ratio = failed as f64 / total as f64;
        let threshold = self.health.failure_threshold;
        if ratio < threshold {
            return 0.0;
        }
        let span = 1.0 - threshold;
        let scale = if span <= 0.0 {
            1.0
        } else {
            ((ratio - threshold) / span).clamp(0.0, 1.0)
        };
        let min = self.health.min_drop_probability;
        let max = self.health.max_drop_probability;
        (min + (max - min) * scale).clamp(0.0, 1.0)
    }

    /// Drops entries unreferenced for longer than the last-seen timeout.
    /// Returns the number of reaped entries.
    pub fn reap(&self) -> usize {
        let mut entries = self.entries.write().expect("endpoint registry lock poisoned");
        let before = entries.len();
        entries.retain(|_, stats| {
            stats.inflight() > 0 || stats.last_seen_age() <= self.last_seen_timeout
        });
        let reaped = before - entries.len();
        if reaped > 0 {
            debug!("reaped {} stale endpoint entries", reaped);
        }
        reaped
    }

    /// Spawns the rotation and reaper loop on the current runtime.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let period = registry.health.period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it so the first window
            // spans a full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.rotate();
                registry.reap();
            }
        })
    }
}
