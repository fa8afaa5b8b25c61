//! The router's answer for one request.

use super::strategy::RoutingStrategy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider: String,
    pub model: String,
    pub strategy: RoutingStrategy,
    pub score: f64,
    /// Set when every provider's circuit was open and one was chosen anyway.
    pub degraded: bool,
    /// Remaining viable providers, best first.
    pub alternatives: Vec<String>,
    pub reason: String,
}

impl RoutingDecision {
    pub fn summary(&self) -> String {
        format!(
            "{}/{} via {} (score {:.3}{})",
            self.provider,
            self.model,
            self.strategy,
            self.score,
            if self.degraded { ", degraded" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_flags_degraded_mode() {
        let d = RoutingDecision {
            provider: "acme".into(),
            model: "acme-1".into(),
            strategy: RoutingStrategy::Adaptive,
            score: 0.5,
            degraded: true,
            alternatives: vec![],
            reason: "all circuits open".into(),
        };
        assert_eq!(d.summary(), "acme/acme-1 via adaptive (score 0.500, degraded)");
    }
}
