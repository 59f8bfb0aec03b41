//! Endpoint selection for load-balanced routes.
//!
//! Every algorithm honors the same two gates:
//!
//! - **Passive health**: an endpoint whose drop probability draws true on a
//!   uniform random comparison is skipped for this request.
//! - **Fade-in**: an endpoint younger than the configured fade-in duration
//!   is selected with probability `(age / duration) ^ exponent`. Fade-in
//!   only shifts traffic; when every healthy endpoint is still fading, the
//!   first healthy one is used rather than failing the request.
//!
//! An empty endpoint set is reported distinctly from "all endpoints
//! unhealthy" so the engine can fail open or closed per configuration.

use crate::models::route::LbAlgorithm;
use crate::services::endpoint_registry::EndpointStats;
use rand::rngs::ThreadRng;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fade-in parameters applied to newly detected endpoints.
#[derive(Debug, Clone)]
pub struct FadeInSettings {
    pub duration: Duration,
    pub exponent: f64,
}

impl Default for FadeInSettings {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            exponent: 1.0,
        }
    }
}

/// Selection weight of an endpoint of the given age.
pub fn fade_in_weight(age: Duration, settings: &FadeInSettings) -> f64 {
    if settings.duration.is_zero() || age >= settings.duration {
        return 1.0;
    }
    (age.as_secs_f64() / settings.duration.as_secs_f64()).powf(settings.exponent)
}

/// Result of one selection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Index of the chosen endpoint.
    Chosen(usize),
    /// Every endpoint was gated by the passive health check; the index is a
    /// best-effort candidate for fail-open operation.
    AllUnhealthy(usize),
    /// The endpoint set is empty.
    Empty,
}

/// Picks one endpoint from a route's set.
pub trait LoadBalancer: Send + Sync {
    /// `endpoints` holds the per-endpoint stats in route declaration order;
    /// `key` is the request key used by hash-based algorithms.
    fn select(
        &self,
        endpoints: &[Arc<EndpointStats>],
        key: Option<&str>,
        fade_in: &FadeInSettings,
    ) -> Selection;
}

fn passes_health(stats: &EndpointStats, rng: &mut ThreadRng) -> bool {
    let p = stats.drop_probability();
    p <= 0.0 || rng.gen::<f64>() >= p
}

fn passes_fade(stats: &EndpointStats, fade_in: &FadeInSettings, rng: &mut ThreadRng) -> bool {
    let w = fade_in_weight(stats.age(), fade_in);
    w >= 1.0 || rng.gen::<f64>() < w
}

/// Round robin: atomic cursor modulo endpoint count. Endpoints in fade-in
/// shift the cursor forward onto the next admitted endpoint.
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(
        &self,
        endpoints: &[Arc<EndpointStats>],
        _key: Option<&str>,
        fade_in: &FadeInSettings,
    ) -> Selection {
        let n = endpoints.len();
        if n == 0 {
            return Selection::Empty;
        }
        let cursor = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut rng = rand::thread_rng();
        let mut first_healthy = None;
        for i in 0..n {
            let idx = (cursor + i) % n;
            let stats = &endpoints[idx];
            if !passes_health(stats, &mut rng) {
                continue;
            }
            if first_healthy.is_none() {
                first_healthy = Some(idx);
            }
            if passes_fade(stats, fade_in, &mut rng) {
                return Selection::Chosen(idx);
            }
        }
        match first_healthy {
            Some(idx) => Selection::Chosen(idx),
            None => Selection::AllUnhealthy(cursor % n),
        }
    }
}

/// Uniform random selection weighted by fade-in.
pub struct RandomBalancer;

impl RandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RandomBalancer {
    fn select(
        &self,
        endpoints: &[Arc<EndpointStats>],
        _key: Option<&str>,
        fade_in: &FadeInSettings,
    ) -> Selection {
        let n = endpoints.len();
        if n == 0 {
            return Selection::Empty;
        }
        let mut rng = rand::thread_rng();
        let healthy: Vec<usize> = (0..n)
            .filter(|&i| passes_health(&endpoints[i], &mut rng))
            .collect();
        if healthy.is_empty() {
            return Selection::AllUnhealthy(rng.gen_range(0..n));
        }
        let weights: Vec<f64> = healthy
            .iter()
            .map(|&i| fade_in_weight(endpoints[i].age(), fade_in))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Selection::Chosen(healthy[rng.gen_range(0..healthy.len())]);
        }
        let mut draw = rng.gen::<f64>() * total;
        for (pos, &idx) in healthy.iter().enumerate() {
            draw -= weights[pos];
            if draw <= 0.0 {
                return Selection::Chosen(idx);
            }
        }
        Selection::Chosen(*healthy.last().expect("non-empty checked"))
    }
}

/// Rendezvous hashing of the request key over the endpoint set.
///
/// With a balance factor, endpoints whose in-flight count exceeds
/// `factor * average` are passed over in ring order, which caps how much a
/// hot key can overload its home endpoint.
pub struct ConsistentHashBalancer {
    balance_factor: Option<f64>,
}

impl ConsistentHashBalancer {
    pub fn new(balance_factor: Option<f64>) -> Self {
        Self { balance_factor }
    }

    fn rank(key: &str, endpoint_key: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        endpoint_key.hash(&mut hasher);
        hasher.finish()
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn select(
        &self,
        endpoints: &[Arc<EndpointStats>],
        key: Option<&str>,
        fade_in: &FadeInSettings,
    ) -> Selection {
        let n = endpoints.len();
        if n == 0 {
            return Selection::Empty;
        }
        let Some(key) = key else {
            // No key to hash; degrade to random selection.
            return RandomBalancer.select(endpoints, None, fade_in);
        };
        let mut rng = rand::thread_rng();

        let mut ranked: Vec<(u64, usize)> = endpoints
            .iter()
            .enumerate()
            .map(|(i, s)| (Self::rank(key, s.key()), i))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let avg_inflight = (endpoints.iter().map(|s| s.inflight()).sum::<u64>() as f64
            / n as f64)
            .max(1.0);

        let mut first_healthy = None;
        for &(_, idx) in &ranked {
            let stats = &endpoints[idx];
            if !passes_health(stats, &mut rng) {
                continue;
            }
            if first_healthy.is_none() {
                first_healthy = Some(idx);
            }
            if let Some(factor) = self.balance_factor {
                if stats.inflight() as f64 > factor * avg_inflight {
                    continue;
                }
            }
            if passes_fade(stats, fade_in, &mut rng) {
                return Selection::Chosen(idx);
            }
        }
        match first_healthy {
            Some(idx) => Selection::Chosen(idx),
            None => Selection::AllUnhealthy(ranked[0].1),
        }
    }
}

/// Default sample size for [`PowerOfChoicesBalancer`].
pub const DEFAULT_CHOICES: usize = 2;

/// Samples N random endpoints and picks the admitted one with the lowest
/// in-flight count.
pub struct PowerOfChoicesBalancer {
    choices: usize,
}

impl PowerOfChoicesBalancer {
    pub fn new(choices: usize) -> Self {
        Self {
            choices: choices.max(1),
        }
    }
}

impl Default for PowerOfChoicesBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_CHOICES)
    }
}

impl LoadBalancer for PowerOfChoicesBalancer {
    fn select(
        &self,
        endpoints: &[Arc<EndpointStats>],
        _key: Option<&str>,
        fade_in: &FadeInSettings,
    ) -> Selection {
        let n = endpoints.len();
        if n == 0 {
            return Selection::Empty;
        }
        let mut rng = rand::thread_rng();
        let mut sampled_any = None;
        let mut best_faded: Option<usize> = None;
        let mut best: Option<usize> = None;
        for _ in 0..self.choices {
            let idx = rng.gen_range(0..n);
            if sampled_any.is_none() {
                sampled_any = Some(idx);
            }
            let stats = &endpoints[idx];
            if !passes_health(stats, &mut rng) {
                continue;
            }
            let slot = if passes_fade(stats, fade_in, &mut rng) {
                &mut best
            } else {
                &mut best_faded
            };
            match slot {
                Some(current) if endpoints[*current].inflight() <= stats.inflight() => {}
                _ => *slot = Some(idx),
            }
        }
        match best.or(best_faded) {
            Some(idx) => Selection::Chosen(idx),
            None => Selection::AllUnhealthy(sampled_any.expect("at least one sample")),
        }
    }
}

/// Per-algorithm construction options.
#[derive(Debug, Clone, Default)]
pub struct LbOptions {
    pub consistent_hash_balance_factor: Option<f64>,
}

/// Creates balancer instances per route, the way the table build consumes
/// them.
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub fn create(algorithm: LbAlgorithm, options: &LbOptions) -> Arc<dyn LoadBalancer> {
        match algorithm {
            LbAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
            LbAlgorithm::Random => Arc::new(RandomBalancer::new()),
            LbAlgorithm::ConsistentHash => Arc::new(ConsistentHashBalancer::new(
                options.consistent_hash_balance_factor,
            )),
            LbAlgorithm::PowerOfRandomNChoices => Arc::new(PowerOfChoicesBalancer::default()),
        }
    }
}

/// Load-balancer state bound to one route by the table build: one balancer
/// instance plus the endpoint stats in route declaration order.
pub struct LbBinding {
    pub algorithm: LbAlgorithm,
    pub balancer: Arc<dyn LoadBalancer>,
    pub stats: Vec<Arc<EndpointStats>>,
}
