//! Fixed-window admission control keyed by caller identity
//!
//! One counter per identity, reset entirely at window boundaries. This
//! deliberately permits a burst of up to twice the nominal rate across a
//! window edge; smoothing that out is a different limiter, not a fix here.
//! State is volatile and single-process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identity used when no client address header is present. All
/// unidentifiable callers share this one budget; accepted limitation.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Admission limits for one window.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per identity per window.
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: Instant,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the window resets and the budget is whole again.
    pub reset_after: Duration,
}

/// Per-identity fixed-window request limiter.
///
/// Owned by the service process: construct once at startup and share by
/// [`Arc`]. Expired entries are always treated as absent, so correctness
/// never depends on the sweeper; sweeping only bounds memory.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limit: config.limit,
            window: config.window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Admission check for one request from `identity`.
    ///
    /// A fresh or expired window starts at `count = 1`; a full window denies
    /// without consuming budget; otherwise the counter increments.
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        if self.limit == 0 {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_after: self.window,
            };
        }
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(identity) {
            Some(entry) if now <= entry.window_reset_at => {
                if entry.count >= self.limit {
                    debug!(identity, "rate limit window full");
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_after: entry.window_reset_at - now,
                    }
                } else {
                    entry.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        remaining: self.limit - entry.count,
                        reset_after: entry.window_reset_at - now,
                    }
                }
            }
            _ => {
                entries.insert(
                    identity.to_string(),
                    RateLimitEntry {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: self.limit - 1,
                    reset_after: self.window,
                }
            }
        }
    }

    /// Drop every entry whose window has already expired. Returns the number
    /// evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.window_reset_at);
        before - entries.len()
    }

    /// Number of identities currently tracked. Memory-footprint
    /// observability, not part of the admission contract.
    pub fn tracked_identities(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Pick the caller identity out of request headers: first hop of
/// `x-forwarded-for`, then `x-real-ip`, then `cf-connecting-ip`, falling
/// back to [`UNKNOWN_IDENTITY`].
pub fn client_identity(headers: &http::HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first_hop) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
        {
            return first_hop.to_string();
        }
    }
    for header in ["x-real-ip", "cf-connecting-ip"] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    UNKNOWN_IDENTITY.to_string()
}

/// Handle to a running sweeper task. Dropping it without calling
/// [`shutdown`](SweeperHandle::shutdown) detaches the task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit. Tie this to process
    /// shutdown.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the periodic eviction task for `limiter`.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, period: Duration) -> SweeperHandle {
    let (tx, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = limiter.sweep();
                    if evicted > 0 {
                        debug!(evicted, "swept expired rate limit windows");
                    }
                }
                _ = rx.changed() => break,
            }
        }
    });
    SweeperHandle {
        shutdown: tx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn limiter(limit: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig { limit, window })
    }

    #[test]
    fn window_walk_counts_down_then_denies() {
        let limiter = limiter(10, Duration::from_secs(600));
        for expected_remaining in (0..10).rev() {
            let decision = limiter.check("1.2.3.4");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let denied = limiter.check("1.2.3.4");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn denied_requests_do_not_consume_budget() {
        let limiter = limiter(2, Duration::from_millis(40));
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        for _ in 0..20 {
            assert!(!limiter.check("a").allowed);
        }
        std::thread::sleep(Duration::from_millis(50));
        // The hammering above must not have extended or refilled the window.
        let fresh = limiter.check("a");
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
    }

    #[test]
    fn window_expiry_restores_full_budget() {
        let limiter = limiter(10, Duration::from_millis(30));
        for _ in 0..10 {
            assert!(limiter.check("a").allowed);
        }
        assert!(!limiter.check("a").allowed);
        std::thread::sleep(Duration::from_millis(40));
        let fresh = limiter.check("a");
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 9);
    }

    #[test]
    fn identities_are_independent() {
        let limiter = limiter(1, Duration::from_secs(600));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let limiter = limiter(0, Duration::from_secs(600));
        assert!(!limiter.check("a").allowed);
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn sweep_evicts_only_expired_windows() {
        let limiter = limiter(10, Duration::from_millis(30));
        limiter.check("stale");
        std::thread::sleep(Duration::from_millis(40));
        limiter.check("live");
        assert_eq!(limiter.tracked_identities(), 2);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_identities(), 1);
        // The surviving window still has its spent count.
        assert_eq!(limiter.check("live").remaining, 8);
    }

    #[test]
    fn check_is_correct_without_any_sweeping() {
        let limiter = limiter(1, Duration::from_millis(20));
        assert!(limiter.check("a").allowed);
        std::thread::sleep(Duration::from_millis(30));
        // Expired entry treated as absent even though it was never swept.
        assert!(limiter.check("a").allowed);
    }

    #[test]
    fn identity_prefers_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_identity(&headers), "203.0.113.7");
    }

    #[test]
    fn identity_falls_through_header_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_identity(&headers), "198.51.100.4");

        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "192.0.2.9".parse().unwrap());
        assert_eq!(client_identity(&headers), "192.0.2.9");

        assert_eq!(client_identity(&HeaderMap::new()), UNKNOWN_IDENTITY);
    }

    #[tokio::test]
    async fn sweeper_evicts_and_shuts_down() {
        let limiter = Arc::new(limiter(10, Duration::from_millis(10)));
        limiter.check("a");
        limiter.check("b");
        let sweeper = spawn_sweeper(limiter.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.tracked_identities(), 0);
        sweeper.shutdown().await;
    }
}
