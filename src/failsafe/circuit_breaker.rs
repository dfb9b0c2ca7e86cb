//! Circuit breaker implementation
//!
//! Tracks failures per named upstream (vision service, weather provider,
//! LLM backend). After a threshold of failures the circuit opens and
//! callers are told to reject preemptively; once the reset timeout passes
//! the circuit moves to half-open and trial calls flow again.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
    /// Circuit is half-open (trial requests allowed)
    HalfOpen,
}

/// Per-upstream tracking state
#[derive(Debug, Clone, Copy)]
struct UpstreamState {
    failures: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
}

impl Default for UpstreamState {
    fn default() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            state: CircuitState::Closed,
        }
    }
}

/// Circuit breaker for upstream service protection
///
/// Holds one tracking entry per upstream name. Entries are created lazily
/// on first use; an unknown upstream is treated as closed.
pub struct CircuitBreaker {
    /// Failures before opening
    failure_threshold: u32,
    /// Cooldown after the last failure before trial calls are admitted
    reset_timeout: Duration,
    /// Per-upstream state
    upstreams: DashMap<String, UpstreamState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout,
            upstreams: DashMap::new(),
        }
    }

    /// Record a successful upstream call
    ///
    /// Resets the failure count and closes the circuit immediately,
    /// whatever state it was in.
    pub fn record_success(&self, upstream: &str) {
        let mut entry = self.upstreams.entry(upstream.to_string()).or_default();
        if entry.state != CircuitState::Closed {
            info!(upstream = %upstream, "Circuit breaker closed");
        }
        entry.failures = 0;
        entry.state = CircuitState::Closed;
    }

    /// Record a failed upstream call
    pub fn record_failure(&self, upstream: &str) {
        let mut entry = self.upstreams.entry(upstream.to_string()).or_default();
        entry.failures += 1;
        entry.last_failure = Some(Instant::now());

        if entry.failures >= self.failure_threshold && entry.state != CircuitState::Open {
            entry.state = CircuitState::Open;
            warn!(
                upstream = %upstream,
                failures = entry.failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Check whether calls to `upstream` should be rejected
    ///
    /// Returns true only while the circuit is open. If the reset timeout
    /// has passed since the last failure, the circuit transitions to
    /// half-open and the caller is told to proceed. The check and the
    /// transition happen under the entry's lock, so concurrent callers
    /// observing an expired open circuit cannot race the state change.
    ///
    /// Half-open admits any number of trial calls; a single recorded
    /// failure re-opens the circuit because the failure count is still at
    /// or above the threshold.
    pub fn is_open(&self, upstream: &str) -> bool {
        let Some(mut entry) = self.upstreams.get_mut(upstream) else {
            return false;
        };
        if entry.state != CircuitState::Open {
            return false;
        }

        let cooled_down = entry
            .last_failure
            .is_none_or(|at| at.elapsed() > self.reset_timeout);
        if cooled_down {
            entry.state = CircuitState::HalfOpen;
            info!(upstream = %upstream, "Circuit breaker half-open, admitting trial calls");
            return false;
        }

        true
    }

    /// Get the current state for an upstream
    #[must_use]
    pub fn state(&self, upstream: &str) -> CircuitState {
        self.upstreams
            .get(upstream)
            .map_or(CircuitState::Closed, |entry| entry.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: timeout,
        })
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(5, Duration::from_secs(60));

        for _ in 0..4 {
            cb.record_failure("vision_service");
        }
        assert!(!cb.is_open("vision_service"));

        cb.record_failure("vision_service");
        assert!(cb.is_open("vision_service"));
        assert_eq!(cb.state("vision_service"), CircuitState::Open);
    }

    #[test]
    fn test_success_closes_immediately() {
        let cb = breaker(5, Duration::from_secs(60));

        for _ in 0..5 {
            cb.record_failure("vision_service");
        }
        assert!(cb.is_open("vision_service"));

        cb.record_success("vision_service");
        assert!(!cb.is_open("vision_service"));
        assert_eq!(cb.state("vision_service"), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = breaker(2, Duration::from_millis(10));

        cb.record_failure("weather_service");
        cb.record_failure("weather_service");
        assert!(cb.is_open("weather_service"));

        std::thread::sleep(Duration::from_millis(15));

        // The query itself performs the transition
        assert!(!cb.is_open("weather_service"));
        assert_eq!(cb.state("weather_service"), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_repeated_trials() {
        let cb = breaker(2, Duration::from_millis(10));

        cb.record_failure("svc");
        cb.record_failure("svc");
        std::thread::sleep(Duration::from_millis(15));
        assert!(!cb.is_open("svc"));

        // No trial budget: stays admitting until an outcome is recorded
        for _ in 0..10 {
            assert!(!cb.is_open("svc"));
        }
    }

    #[test]
    fn test_failure_in_half_open_reopens() {
        let cb = breaker(2, Duration::from_millis(10));

        cb.record_failure("svc");
        cb.record_failure("svc");
        std::thread::sleep(Duration::from_millis(15));
        assert!(!cb.is_open("svc"));
        assert_eq!(cb.state("svc"), CircuitState::HalfOpen);

        // Failure count is still over threshold, so one failure re-opens
        cb.record_failure("svc");
        assert!(cb.is_open("svc"));
    }

    #[test]
    fn test_unknown_upstream_is_closed() {
        let cb = breaker(5, Duration::from_secs(60));
        assert!(!cb.is_open("never_seen"));
        assert_eq!(cb.state("never_seen"), CircuitState::Closed);
    }

    #[test]
    fn test_upstreams_are_independent() {
        let cb = breaker(2, Duration::from_secs(60));

        cb.record_failure("svc_a");
        cb.record_failure("svc_a");

        assert!(cb.is_open("svc_a"));
        assert!(!cb.is_open("svc_b"));
    }
}
