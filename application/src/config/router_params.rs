//! Router parameters.

use serde::{Deserialize, Serialize};
use toolbridge_domain::providers::DEFAULT_EMA_ALPHA;
use toolbridge_domain::{CircuitBreakerConfig, RoutingStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterParams {
    pub strategy: RoutingStrategy,
    /// Per-provider breaker thresholds.
    pub breaker: CircuitBreakerConfig,
    /// Latency EMA smoothing factor.
    pub ema_alpha: f64,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Adaptive,
            breaker: CircuitBreakerConfig::default(),
            ema_alpha: DEFAULT_EMA_ALPHA,
        }
    }
}

impl RouterParams {
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}
