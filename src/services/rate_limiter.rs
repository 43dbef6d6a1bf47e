//! Admission engine combining three per-tier algorithms with a global
//! fixed-window ceiling.
//!
//! State lives in four disjoint client maps keyed by `(tier, ip)` so two
//! tiers sharing an algorithm never share counters. There is no background
//! cleanup: unused entries persist until process restart, which bounds
//! memory for bounded client populations.

use crate::models::settings::{Algorithm, RateLimitSettings, Tier};
use ahash::AHashMap;
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sentinel key for the process-wide fixed-window counter.
const GLOBAL_KEY: &str = "__global__";

/// Outcome of an admission check.
///
/// `remaining == -1` and `limit == -1` mean "unlimited": the tier is
/// disabled, unknown, or malformed, and the engine fails open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_ms: u64,
    pub limit: i64,
}

impl Decision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: -1,
            reset_ms: 0,
            limit: -1,
        }
    }

    /// Header value for `X-RateLimit-Reset`, in whole seconds rounded up.
    pub fn reset_secs(&self) -> u64 {
        self.reset_ms.div_ceil(1000)
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct FixedWindowState {
    count: u64,
    window_start: Instant,
}

/// The four per-client state maps. All operations are O(1) amortized and
/// never suspend while the lock is held.
#[derive(Default)]
struct LimiterState {
    buckets: AHashMap<String, TokenBucketState>,
    sliding: AHashMap<String, Vec<Instant>>,
    fixed: AHashMap<String, FixedWindowState>,
    global: AHashMap<String, FixedWindowState>,
}

/// Rate-limiting engine.
///
/// One `check` per request: the global ceiling is consumed first, then the
/// resolved tier's algorithm runs. Rejections on either level increment the
/// shared `rate_limit_hits` counter read by the analytics engine.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    settings: RateLimitSettings,
    state: Mutex<LimiterState>,
    hits: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Builds the engine over a validated tier table.
    ///
    /// `hits` is the rejection counter shared with the analytics engine.
    /// Malformed tiers are admitted as unlimited at check time; each one is
    /// flagged once here so operators notice.
    pub fn new(settings: RateLimitSettings, hits: Arc<AtomicU64>) -> Self {
        for (name, tier) in &settings.tiers {
            if !tier.is_well_formed() {
                warn!(
                    "tier '{}' is missing parameters for {:?}; treating as unlimited",
                    name, tier.algorithm
                );
            }
        }
        Self {
            inner: Arc::new(LimiterInner {
                settings,
                state: Mutex::new(LimiterState::default()),
                hits,
            }),
        }
    }

    /// Checks one request from `ip` under `tier_name` against the global
    /// ceiling and the tier's algorithm.
    pub fn check(&self, ip: &str, tier_name: &str) -> Decision {
        self.check_at(ip, tier_name, Instant::now())
    }

    /// Clock-injected variant of [`check`](Self::check); admission tests
    /// drive this with synthetic instants instead of sleeping.
    pub fn check_at(&self, ip: &str, tier_name: &str, now: Instant) -> Decision {
        let inner = &self.inner;
        let mut state = match inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Global ceiling first; a global rejection reports the global limit
        // and skips the tier check entirely.
        let global = &inner.settings.global_limit;
        let global_decision = check_fixed_window(
            &mut state.global,
            GLOBAL_KEY,
            global.max_requests,
            Duration::from_millis(global.window_ms),
            now,
        );
        if !global_decision.allowed {
            drop(state);
            inner.hits.fetch_add(1, Ordering::Relaxed);
            return Decision {
                limit: global.max_requests as i64,
                ..global_decision
            };
        }

        let tier = match self.resolve_tier(tier_name) {
            Some(tier) => tier,
            None => return Decision::unlimited(),
        };
        if tier.algorithm == Algorithm::None || !tier.is_well_formed() {
            return Decision::unlimited();
        }

        let key = format!("{}:{}", tier_name, ip);
        let decision = match tier.algorithm {
            Algorithm::TokenBucket => check_token_bucket(
                &mut state.buckets,
                &key,
                tier.max_requests.unwrap_or(0),
                tier.refill_rate.unwrap_or(0.0),
                now,
            ),
            Algorithm::SlidingWindow => check_sliding_window(
                &mut state.sliding,
                &key,
                tier.max_requests.unwrap_or(0),
                Duration::from_millis(tier.window_ms.unwrap_or(0)),
                now,
            ),
            Algorithm::FixedWindow => check_fixed_window(
                &mut state.fixed,
                &key,
                tier.max_requests.unwrap_or(0),
                Duration::from_millis(tier.window_ms.unwrap_or(0)),
                now,
            ),
            Algorithm::None => Decision::unlimited(),
        };
        drop(state);

        if !decision.allowed {
            inner.hits.fetch_add(1, Ordering::Relaxed);
        }
        decision
    }

    /// Total rejections so far, global and per-tier combined.
    pub fn rate_limit_hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    fn resolve_tier(&self, tier_name: &str) -> Option<&Tier> {
        let tiers = &self.inner.settings.tiers;
        tiers
            .get(tier_name)
            .or_else(|| tiers.get(&self.inner.settings.default_tier))
    }
}

fn check_token_bucket(
    buckets: &mut AHashMap<String, TokenBucketState>,
    key: &str,
    max_requests: u64,
    refill_rate: f64,
    now: Instant,
) -> Decision {
    let entry = buckets.entry(key.to_string()).or_insert(TokenBucketState {
        tokens: max_requests as f64,
        last_refill: now,
    });

    // saturating_duration_since clamps a backward clock step to zero.
    let elapsed = now.saturating_duration_since(entry.last_refill).as_secs_f64();
    entry.tokens = (entry.tokens + elapsed * refill_rate).min(max_requests as f64);
    entry.last_refill = now;

    if entry.tokens >= 1.0 {
        entry.tokens -= 1.0;
        let reset_ms = if entry.tokens <= 0.0 {
            ((1.0 / refill_rate) * 1000.0).ceil() as u64
        } else {
            0
        };
        Decision {
            allowed: true,
            remaining: entry.tokens.floor() as i64,
            reset_ms,
            limit: max_requests as i64,
        }
    } else {
        Decision {
            allowed: false,
            remaining: 0,
            reset_ms: (((1.0 - entry.tokens) / refill_rate) * 1000.0).ceil() as u64,
            limit: max_requests as i64,
        }
    }
}

fn check_sliding_window(
    sliding: &mut AHashMap<String, Vec<Instant>>,
    key: &str,
    max_requests: u64,
    window: Duration,
    now: Instant,
) -> Decision {
    let timestamps = sliding.entry(key.to_string()).or_default();
    timestamps.retain(|ts| now.saturating_duration_since(*ts) < window);

    let count = timestamps.len() as u64;
    let window_ms = window.as_millis() as u64;
    if count < max_requests {
        timestamps.push(now);
        let reset_ms = timestamps
            .first()
            .map(|oldest| {
                window_ms.saturating_sub(now.saturating_duration_since(*oldest).as_millis() as u64)
            })
            .unwrap_or(window_ms);
        Decision {
            allowed: true,
            remaining: (max_requests - count) as i64,
            reset_ms,
            limit: max_requests as i64,
        }
    } else {
        let oldest = timestamps[0];
        Decision {
            allowed: false,
            remaining: 0,
            reset_ms: window_ms
                .saturating_sub(now.saturating_duration_since(oldest).as_millis() as u64),
            limit: max_requests as i64,
        }
    }
}

fn check_fixed_window(
    fixed: &mut AHashMap<String, FixedWindowState>,
    key: &str,
    max_requests: u64,
    window: Duration,
    now: Instant,
) -> Decision {
    let entry = fixed.entry(key.to_string()).or_insert(FixedWindowState {
        count: 0,
        window_start: now,
    });
    if now.saturating_duration_since(entry.window_start) >= window {
        entry.count = 0;
        entry.window_start = now;
    }

    let window_ms = window.as_millis() as u64;
    let reset_ms = window_ms
        .saturating_sub(now.saturating_duration_since(entry.window_start).as_millis() as u64);

    if entry.count < max_requests {
        entry.count += 1;
        Decision {
            allowed: true,
            remaining: (max_requests - entry.count) as i64,
            reset_ms,
            limit: max_requests as i64,
        }
    } else {
        Decision {
            allowed: false,
            remaining: 0,
            reset_ms,
            limit: max_requests as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tier(algorithm: Algorithm, max: Option<u64>, window: Option<u64>, refill: Option<f64>) -> Tier {
        Tier {
            algorithm,
            max_requests: max,
            window_ms: window,
            refill_rate: refill,
        }
    }

    fn limiter_with(tiers: Vec<(&str, Tier)>, default_tier: &str, global_max: u64) -> RateLimiter {
        let tiers: HashMap<String, Tier> = tiers
            .into_iter()
            .map(|(name, t)| (name.to_string(), t))
            .collect();
        RateLimiter::new(
            RateLimitSettings {
                tiers,
                default_tier: default_tier.to_string(),
                global_limit: crate::models::settings::GlobalLimit {
                    max_requests: global_max,
                    window_ms: 60_000,
                },
            },
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[test]
    fn token_bucket_drains_then_rejects() {
        let limiter = limiter_with(
            vec![("free", tier(Algorithm::TokenBucket, Some(5), None, Some(1.0)))],
            "free",
            1_000_000,
        );
        let now = Instant::now();

        let mut remainders = Vec::new();
        for _ in 0..5 {
            let d = limiter.check_at("10.0.0.1", "free", now);
            assert!(d.allowed);
            remainders.push(d.remaining);
        }
        assert_eq!(remainders, vec![4, 3, 2, 1, 0]);

        let sixth = limiter.check_at("10.0.0.1", "free", now);
        assert!(!sixth.allowed);
        assert_eq!(sixth.limit, 5);
        assert!((990..=1010).contains(&sixth.reset_ms), "reset_ms={}", sixth.reset_ms);
        assert_eq!(limiter.rate_limit_hits(), 1);
    }

    #[test]
    fn token_bucket_refills_at_rate() {
        let limiter = limiter_with(
            vec![("free", tier(Algorithm::TokenBucket, Some(5), None, Some(1.0)))],
            "free",
            1_000_000,
        );
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("10.0.0.1", "free", start).allowed);
        }
        assert!(!limiter.check_at("10.0.0.1", "free", start).allowed);

        // Three idle seconds at 1 token/s admit exactly three more.
        let later = start + Duration::from_secs(3);
        for _ in 0..3 {
            assert!(limiter.check_at("10.0.0.1", "free", later).allowed);
        }
        assert!(!limiter.check_at("10.0.0.1", "free", later).allowed);
    }

    #[test]
    fn per_ip_isolation() {
        let limiter = limiter_with(
            vec![("free", tier(Algorithm::TokenBucket, Some(5), None, Some(1.0)))],
            "free",
            1_000_000,
        );
        let now = Instant::now();
        for _ in 0..5 {
            limiter.check_at("10.0.0.1", "free", now);
        }
        assert!(!limiter.check_at("10.0.0.1", "free", now).allowed);

        let other = limiter.check_at("10.0.0.2", "free", now);
        assert!(other.allowed);
        assert_eq!(other.remaining, 4);
    }

    #[test]
    fn global_ceiling_applies_across_clients() {
        let limiter = limiter_with(
            vec![("unlimited", tier(Algorithm::None, None, None, None))],
            "unlimited",
            5,
        );
        let now = Instant::now();
        for i in 0..5 {
            let d = limiter.check_at(&format!("10.0.0.{}", i + 1), "unlimited", now);
            assert!(d.allowed, "request {} should pass the ceiling", i + 1);
        }
        let sixth = limiter.check_at("10.0.0.99", "unlimited", now);
        assert!(!sixth.allowed);
        assert_eq!(sixth.limit, 5);
        assert_eq!(limiter.rate_limit_hits(), 1);
    }

    #[test]
    fn sliding_window_caps_and_rolls() {
        let limiter = limiter_with(
            vec![("free", tier(Algorithm::SlidingWindow, Some(10), Some(60_000), None))],
            "free",
            1_000_000,
        );
        let start = Instant::now();
        for i in 0..10 {
            let at = start + Duration::from_millis(i * 100);
            assert!(limiter.check_at("10.0.0.1", "free", at).allowed);
        }
        let eleventh = limiter.check_at("10.0.0.1", "free", start + Duration::from_secs(2));
        assert!(!eleventh.allowed);

        // 60s after the first admit the window has rolled past it.
        let rolled = limiter.check_at("10.0.0.1", "free", start + Duration::from_millis(60_001));
        assert!(rolled.allowed);
    }

    #[test]
    fn fixed_window_resets_on_boundary() {
        let limiter = limiter_with(
            vec![("free", tier(Algorithm::FixedWindow, Some(3), Some(1_000), None))],
            "free",
            1_000_000,
        );
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("10.0.0.1", "free", start).allowed);
        }
        assert!(!limiter.check_at("10.0.0.1", "free", start).allowed);

        let next_window = start + Duration::from_millis(1_000);
        assert!(limiter.check_at("10.0.0.1", "free", next_window).allowed);
    }

    #[test]
    fn unknown_tier_falls_back_to_default() {
        let limiter = limiter_with(
            vec![("free", tier(Algorithm::FixedWindow, Some(2), Some(60_000), None))],
            "free",
            1_000_000,
        );
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", "gold", now).allowed);
        assert!(limiter.check_at("10.0.0.1", "gold", now).allowed);
        assert!(!limiter.check_at("10.0.0.1", "gold", now).allowed);
    }

    #[test]
    fn none_algorithm_is_unlimited() {
        let limiter = limiter_with(
            vec![("internal", tier(Algorithm::None, None, None, None))],
            "internal",
            1_000_000,
        );
        let d = limiter.check_at("10.0.0.1", "internal", Instant::now());
        assert!(d.allowed);
        assert_eq!(d.remaining, -1);
        assert_eq!(d.limit, -1);
    }

    #[test]
    fn malformed_tier_fails_open() {
        let limiter = limiter_with(
            vec![("broken", tier(Algorithm::TokenBucket, Some(5), None, None))],
            "broken",
            1_000_000,
        );
        let now = Instant::now();
        for _ in 0..50 {
            let d = limiter.check_at("10.0.0.1", "broken", now);
            assert!(d.allowed);
            assert_eq!(d.limit, -1);
        }
    }

    #[test]
    fn tiers_sharing_an_algorithm_do_not_share_counters() {
        let limiter = limiter_with(
            vec![
                ("a", tier(Algorithm::FixedWindow, Some(1), Some(60_000), None)),
                ("b", tier(Algorithm::FixedWindow, Some(1), Some(60_000), None)),
            ],
            "a",
            1_000_000,
        );
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", "a", now).allowed);
        assert!(!limiter.check_at("10.0.0.1", "a", now).allowed);
        // Same ip under tier b has its own counter.
        assert!(limiter.check_at("10.0.0.1", "b", now).allowed);
    }

    #[test]
    fn reset_secs_rounds_up() {
        let d = Decision {
            allowed: false,
            remaining: 0,
            reset_ms: 1_001,
            limit: 5,
        };
        assert_eq!(d.reset_secs(), 2);
    }
}
