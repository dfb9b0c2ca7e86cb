//! Rate limiting implementation
//!
//! Sliding-window admission control. Each caller key has a timestamp log;
//! a separate global log bounds total throughput across all callers.
//! Entries older than the window are pruned lazily on every check, so no
//! background maintenance is needed.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Admission decision for a single request
///
/// A decision is always produced; rate limiting never errors. On rejection
/// the message is suitable for direct inclusion in a 429 response body.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Human-readable rejection reason
    pub message: Option<String>,
    /// Estimated seconds until the caller's window frees up
    pub retry_after_secs: Option<u64>,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
            retry_after_secs: None,
        }
    }

    fn rejected(message: String, retry_after_secs: Option<u64>) -> Self {
        Self {
            allowed: false,
            message: Some(message),
            retry_after_secs,
        }
    }
}

/// Rate limiter for request throttling
pub struct RateLimiter {
    /// Sliding window duration
    window: Duration,
    /// Base per-key limit
    per_key_limit: usize,
    /// Shared limit across all keys
    global_limit: usize,
    /// Tighter limits for expensive endpoints
    endpoint_overrides: HashMap<String, usize>,
    /// Request instants across all keys
    global_log: Mutex<VecDeque<Instant>>,
    /// Request instants per caller key
    key_logs: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window,
            per_key_limit: config.per_key_limit as usize,
            global_limit: config.global_limit as usize,
            endpoint_overrides: config
                .endpoint_overrides
                .iter()
                .map(|(endpoint, limit)| (endpoint.clone(), *limit as usize))
                .collect(),
            global_log: Mutex::new(VecDeque::new()),
            key_logs: DashMap::new(),
        }
    }

    /// Check whether a request from `key` may proceed
    ///
    /// The global limit is checked before the per-key limit so a global
    /// storm rejects without touching per-key state. On success the current
    /// instant is recorded in both logs.
    pub fn check(&self, key: &str, endpoint: Option<&str>) -> Admission {
        let now = Instant::now();

        {
            let mut global = self.global_log.lock();
            Self::prune(&mut global, now, self.window);
            if global.len() >= self.global_limit {
                warn!(key = %key, "Global rate limit exceeded");
                return Admission::rejected(
                    "Global rate limit exceeded. Please try again later.".to_string(),
                    None,
                );
            }
        }

        let mut log = self.key_logs.entry(key.to_string()).or_default();
        Self::prune(&mut log, now, self.window);

        let mut limit = self.per_key_limit;
        if let Some(endpoint) = endpoint
            && let Some(cap) = self.endpoint_overrides.get(endpoint)
        {
            limit = limit.min(*cap);
        }

        if log.len() >= limit {
            let retry_after = log.front().map_or(0, |oldest| {
                self.window
                    .saturating_sub(now.duration_since(*oldest))
                    .as_secs()
            });
            warn!(
                key = %key,
                endpoint = endpoint.unwrap_or("-"),
                limit,
                retry_after,
                "Rate limit exceeded"
            );
            return Admission::rejected(
                format!("Rate limit exceeded. Retry after {retry_after} seconds."),
                Some(retry_after),
            );
        }

        log.push_back(now);
        drop(log);
        self.global_log.lock().push_back(now);

        debug!(key = %key, "Rate limit check passed");
        Admission::allowed()
    }

    /// Number of caller keys currently tracked
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.key_logs.len()
    }

    /// Drop log entries older than the window
    fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while log.front().is_some_and(|instant| *instant < cutoff) {
            log.pop_front();
        }
    }
}
