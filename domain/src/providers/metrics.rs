//! Rolling performance record for one provider.

use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, Transition};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default smoothing factor for the latency EMA.
pub const DEFAULT_EMA_ALPHA: f64 = 0.2;

/// Window used for "recent" request counts and failure bonuses.
pub const RECENT_WINDOW: Duration = Duration::from_secs(60);

/// Result of one provider call, as reported back to the router.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOutcome {
    pub success: bool,
    pub latency: Duration,
    pub tokens: u64,
}

impl CallOutcome {
    pub fn success(latency: Duration, tokens: u64) -> Self {
        Self {
            success: true,
            latency,
            tokens,
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
            tokens: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderMetrics {
    alpha: f64,
    success_count: u64,
    failure_count: u64,
    ema_latency_ms: Option<f64>,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    total_tokens: u64,
    recent_requests: VecDeque<Instant>,
    breaker: CircuitBreaker,
}

impl ProviderMetrics {
    pub fn new(breaker: CircuitBreakerConfig, alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            success_count: 0,
            failure_count: 0,
            ema_latency_ms: None,
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
            total_tokens: 0,
            recent_requests: VecDeque::new(),
            breaker: CircuitBreaker::new(breaker),
        }
    }

    /// Apply one call outcome. This is the only way counters and circuit state change.
    pub fn record(&mut self, outcome: &CallOutcome, now: Instant) -> Option<Transition> {
        let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
        self.ema_latency_ms = Some(match self.ema_latency_ms {
            Some(prev) => self.alpha * latency_ms + (1.0 - self.alpha) * prev,
            None => latency_ms,
        });

        if outcome.success {
            self.success_count += 1;
            self.consecutive_failures = 0;
            self.last_success = Some(now);
            self.total_tokens += outcome.tokens;
            self.breaker.record_success()
        } else {
            self.failure_count += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure = Some(now);
            self.breaker.record_failure(now)
        }
    }

    /// Count a dispatched request towards the load window.
    pub fn note_request(&mut self, now: Instant) {
        self.prune(now);
        self.recent_requests.push_back(now);
    }

    pub fn recent_request_count(&self, now: Instant) -> usize {
        self.recent_requests
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < RECENT_WINDOW)
            .count()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent_requests.front() {
            if now.saturating_duration_since(*front) >= RECENT_WINDOW {
                self.recent_requests.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Laplace-smoothed success rate, 0.5 for a provider with no history.
    pub fn success_rate(&self) -> f64 {
        (self.success_count as f64 + 1.0) / (self.total_requests() as f64 + 2.0)
    }

    pub fn ema_latency_ms(&self) -> Option<f64> {
        self.ema_latency_ms
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn had_failure_within(&self, now: Instant, window: Duration) -> bool {
        self.last_failure
            .map(|t| now.saturating_duration_since(t) < window)
            .unwrap_or(false)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.breaker
    }

    pub fn snapshot(&self, name: &str, now: Instant) -> ProviderMetricsSnapshot {
        ProviderMetricsSnapshot {
            provider: name.to_string(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
            ema_latency_ms: self.ema_latency_ms,
            consecutive_failures: self.consecutive_failures,
            total_tokens: self.total_tokens,
            recent_requests: self.recent_request_count(now),
            circuit: self.breaker.snapshot(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetricsSnapshot {
    pub provider: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub ema_latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub total_tokens: u64,
    pub recent_requests: usize,
    pub circuit: CircuitSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;

    fn metrics() -> ProviderMetrics {
        ProviderMetrics::new(
            CircuitBreakerConfig::new(2, Duration::from_secs(10)),
            DEFAULT_EMA_ALPHA,
        )
    }

    #[test]
    fn first_sample_seeds_the_ema() {
        let mut m = metrics();
        m.record(&CallOutcome::success(Duration::from_millis(500), 10), Instant::now());
        assert_eq!(m.ema_latency_ms(), Some(500.0));
    }

    #[test]
    fn ema_moves_by_alpha() {
        let mut m = metrics();
        let now = Instant::now();
        m.record(&CallOutcome::success(Duration::from_millis(1000), 0), now);
        m.record(&CallOutcome::success(Duration::from_millis(2000), 0), now);
        let ema = m.ema_latency_ms().unwrap();
        assert!((ema - 1200.0).abs() < 1e-6, "ema was {ema}");
    }

    #[test]
    fn failures_drive_the_breaker() {
        let mut m = metrics();
        let now = Instant::now();
        assert_eq!(m.record(&CallOutcome::failure(Duration::ZERO), now), None);
        assert_eq!(
            m.record(&CallOutcome::failure(Duration::ZERO), now),
            Some(Transition::Opened)
        );
        assert_eq!(m.breaker().state_at(now), CircuitState::Open);
        assert_eq!(m.consecutive_failures(), 2);
        assert!(m.had_failure_within(now, Duration::from_secs(1)));
    }

    #[test]
    fn success_rate_is_smoothed() {
        let mut m = metrics();
        assert!((m.success_rate() - 0.5).abs() < 1e-9);
        let now = Instant::now();
        for _ in 0..8 {
            m.record(&CallOutcome::success(Duration::from_millis(1), 1), now);
        }
        assert!((m.success_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn recent_requests_expire_after_window() {
        let mut m = metrics();
        let now = Instant::now();
        m.note_request(now);
        m.note_request(now);
        assert_eq!(m.recent_request_count(now), 2);
        assert_eq!(m.recent_request_count(now + RECENT_WINDOW), 0);
        m.note_request(now + RECENT_WINDOW);
        assert_eq!(m.recent_request_count(now + RECENT_WINDOW), 1);
    }

    #[test]
    fn snapshot_carries_circuit_view() {
        let mut m = metrics();
        let now = Instant::now();
        m.record(&CallOutcome::success(Duration::from_millis(20), 42), now);
        let snap = m.snapshot("acme", now);
        assert_eq!(snap.provider, "acme");
        assert_eq!(snap.total_tokens, 42);
        assert_eq!(snap.circuit.state, CircuitState::Closed);
    }
}
