//! Provider scoring strategies.
//!
//! Every strategy maps a candidate to a score where higher is better. Scores
//! are comparable only within one strategy; the adaptive strategy blends
//! the others with weights derived from the request's sensitivities.

use super::characteristics::{Level, RequestCharacteristics};
use crate::providers::{ProviderMetrics, ProviderProfile};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// A provider with no failure inside this window earns the reliability bonus.
const NO_RECENT_FAILURE_WINDOW: Duration = Duration::from_secs(300);

/// Latency assumed for a provider that has not been called yet.
const UNKNOWN_LATENCY_MS: f64 = 2_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    PerformanceWeighted,
    CostOptimized,
    LoadBalanced,
    ReliabilityFocused,
    #[default]
    Adaptive,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::PerformanceWeighted => "performance_weighted",
            RoutingStrategy::CostOptimized => "cost_optimized",
            RoutingStrategy::LoadBalanced => "load_balanced",
            RoutingStrategy::ReliabilityFocused => "reliability_focused",
            RoutingStrategy::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "performance" | "performance_weighted" => Ok(RoutingStrategy::PerformanceWeighted),
            "cost" | "cost_optimized" => Ok(RoutingStrategy::CostOptimized),
            "load" | "load_balanced" => Ok(RoutingStrategy::LoadBalanced),
            "reliability" | "reliability_focused" => Ok(RoutingStrategy::ReliabilityFocused),
            "adaptive" => Ok(RoutingStrategy::Adaptive),
            other => Err(format!("unknown routing strategy '{other}'")),
        }
    }
}

/// One provider under consideration.
pub struct Candidate<'a> {
    pub profile: &'a ProviderProfile,
    pub metrics: &'a ProviderMetrics,
}

fn latency_ms(metrics: &ProviderMetrics) -> f64 {
    metrics.ema_latency_ms().unwrap_or(UNKNOWN_LATENCY_MS).max(1.0)
}

fn performance(c: &Candidate<'_>) -> f64 {
    let latency_score = 1.0 / (1.0 + latency_ms(c.metrics) / 1000.0);
    let experience = (c.metrics.total_requests() as f64 / 50.0).min(1.0);
    0.5 * c.metrics.success_rate() + 0.3 * latency_score + 0.2 * experience
}

fn cost(c: &Candidate<'_>, chars: &RequestCharacteristics) -> f64 {
    let tokens = chars.token_estimate.max(1);
    let price = c.profile.estimated_cost(tokens);
    let rate = c.metrics.success_rate();
    let reliability = if rate < 0.8 { rate * rate } else { rate };
    reliability / (1.0 + price)
}

fn load(c: &Candidate<'_>, now: Instant) -> f64 {
    let pressure = c.metrics.recent_request_count(now) as f64 * latency_ms(c.metrics) / 1000.0;
    1.0 / (1.0 + pressure)
}

fn reliability(c: &Candidate<'_>, now: Instant) -> f64 {
    let bonus = if c.metrics.had_failure_within(now, NO_RECENT_FAILURE_WINDOW) {
        0.0
    } else {
        0.2
    };
    let streak_penalty = 0.05 * c.metrics.consecutive_failures() as f64;
    (c.metrics.success_rate() + bonus - streak_penalty).max(0.0)
}

/// Blend weights for the adaptive strategy, in the order
/// performance, cost, load, reliability.
pub fn adaptive_weights(chars: &RequestCharacteristics) -> [f64; 4] {
    let mut w = [1.0, 0.5, 0.5, 1.0];
    if chars.latency_sensitivity == Level::High {
        w[0] += 1.0;
        w[2] += 1.0;
    }
    if chars.cost_sensitivity == Level::High {
        w[1] += 2.0;
    }
    if chars.urgency == Level::High {
        w[0] += 0.5;
        w[3] += 1.5;
    }
    if chars.complexity > 0.7 {
        w[3] += 1.0;
    }
    let total: f64 = w.iter().sum();
    w.map(|x| x / total)
}

/// Score one candidate under `strategy`.
pub fn score(
    strategy: RoutingStrategy,
    candidate: &Candidate<'_>,
    chars: &RequestCharacteristics,
    now: Instant,
) -> f64 {
    match strategy {
        RoutingStrategy::PerformanceWeighted => performance(candidate),
        RoutingStrategy::CostOptimized => cost(candidate, chars),
        RoutingStrategy::LoadBalanced => load(candidate, now),
        RoutingStrategy::ReliabilityFocused => reliability(candidate, now),
        RoutingStrategy::Adaptive => {
            let w = adaptive_weights(chars);
            w[0] * performance(candidate)
                + w[1] * cost(candidate, chars)
                + w[2] * load(candidate, now)
                + w[3] * reliability(candidate, now)
        }
    }
}

/// Order candidates best-first. Ties break on provider name so the result is deterministic.
pub fn rank<'a>(
    strategy: RoutingStrategy,
    candidates: &'a [Candidate<'a>],
    chars: &RequestCharacteristics,
    now: Instant,
) -> Vec<(&'a Candidate<'a>, f64)> {
    let mut scored: Vec<_> = candidates
        .iter()
        .map(|c| (c, score(strategy, c, chars, now)))
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.profile.name.cmp(&b.profile.name))
    });
    scored
}
