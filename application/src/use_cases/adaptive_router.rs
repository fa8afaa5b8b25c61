//! Adaptive provider router.
//!
//! Owns the process-wide provider registry. Each registered provider carries
//! its own [`ProviderMetrics`] (and therefore its own circuit breaker) behind
//! a mutex; [`AdaptiveRouter::record_outcome`] is the single mutation point.
//!
//! Selection works on cloned metrics so ranking never holds more than one
//! provider lock at a time. The chosen provider's breaker is then claimed
//! under its own lock; if a concurrent caller took the half-open probe in the
//! meantime, the next-best candidate is tried.

use crate::config::RouterParams;
use crate::ports::provider_client::ProviderClient;
use futures::future::join_all;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use toolbridge_domain::routing::{Candidate, rank};
use toolbridge_domain::{
    CallOutcome, DomainError, ErrorKind, ProviderMetrics, ProviderMetricsSnapshot,
    ProviderProfile, RequestCharacteristics, RoutingDecision, RoutingStrategy, Transition,
};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RouterError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::Domain(e) => e.kind(),
            RouterError::UnknownProvider(_) => ErrorKind::Capacity,
        }
    }
}

struct ProviderEntry {
    client: Arc<dyn ProviderClient>,
    metrics: Mutex<ProviderMetrics>,
}

impl ProviderEntry {
    fn profile(&self) -> &ProviderProfile {
        self.client.profile()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct AdaptiveRouter {
    params: RouterParams,
    providers: RwLock<Vec<Arc<ProviderEntry>>>,
}

impl AdaptiveRouter {
    pub fn new(params: RouterParams) -> Self {
        Self {
            params,
            providers: RwLock::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    fn entries(&self) -> Vec<Arc<ProviderEntry>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn entry(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.profile().name == name)
            .cloned()
    }

    /// Register a provider. Re-registering a name replaces the client and resets its metrics.
    pub fn register(&self, client: Arc<dyn ProviderClient>) {
        let name = client.profile().name.clone();
        let entry = Arc::new(ProviderEntry {
            client,
            metrics: Mutex::new(ProviderMetrics::new(self.params.breaker, self.params.ema_alpha)),
        });
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        providers.retain(|e| e.profile().name != name);
        providers.push(entry);
        info!("Router: registered provider '{}'", name);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        let before = providers.len();
        providers.retain(|e| e.profile().name != name);
        before != providers.len()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| e.profile().name.clone())
            .collect()
    }

    pub fn client(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.entry(name).map(|e| Arc::clone(&e.client))
    }

    /// Select with the configured strategy.
    pub fn select(&self, chars: &RequestCharacteristics) -> Result<RoutingDecision, RouterError> {
        self.select_at(self.params.strategy, chars, Instant::now())
    }

    pub fn select_with(
        &self,
        strategy: RoutingStrategy,
        chars: &RequestCharacteristics,
    ) -> Result<RoutingDecision, RouterError> {
        self.select_at(strategy, chars, Instant::now())
    }

    /// Select at an explicit instant; the clock is a parameter so selection is testable.
    pub fn select_at(
        &self,
        strategy: RoutingStrategy,
        chars: &RequestCharacteristics,
        now: Instant,
    ) -> Result<RoutingDecision, RouterError> {
        let entries = self.entries();
        if entries.is_empty() {
            return Err(DomainError::NoProviders.into());
        }

        let snapshots: Vec<(Arc<ProviderEntry>, ProviderMetrics)> = entries
            .into_iter()
            .map(|e| {
                let m = e.lock().clone();
                (e, m)
            })
            .collect();

        let viable: Vec<&(Arc<ProviderEntry>, ProviderMetrics)> = snapshots
            .iter()
            .filter(|(_, m)| m.breaker().would_admit(now))
            .collect();

        if viable.is_empty() {
            return Ok(self.degraded_decision(strategy, chars, &snapshots, now));
        }

        // Prefer providers that can actually serve the request's modality.
        let capable: Vec<_> = viable
            .iter()
            .copied()
            .filter(|(e, _)| !chars.needs_vision || e.profile().supports_vision())
            .collect();
        let pool = if capable.is_empty() { viable } else { capable };

        let candidates: Vec<Candidate<'_>> = pool
            .iter()
            .map(|(e, m)| Candidate {
                profile: e.profile(),
                metrics: m,
            })
            .collect();
        let ranked = rank(strategy, &candidates, chars, now);

        for (idx, (candidate, score)) in ranked.iter().enumerate() {
            let name = &candidate.profile.name;
            let Some(entry) = pool
                .iter()
                .find(|(e, _)| &e.profile().name == name)
                .map(|(e, _)| e)
            else {
                continue;
            };

            let admitted = {
                let mut metrics = entry.lock();
                let (admitted, transition) = metrics.breaker_mut().try_acquire(now);
                if admitted {
                    metrics.note_request(now);
                }
                log_transition(name, transition);
                admitted
            };
            if !admitted {
                debug!("Router: '{}' lost its probe slot, trying next candidate", name);
                continue;
            }

            let decision = RoutingDecision {
                provider: name.clone(),
                model: candidate.profile.select_model(chars).to_string(),
                strategy,
                score: *score,
                degraded: false,
                alternatives: ranked
                    .iter()
                    .skip(idx + 1)
                    .map(|(c, _)| c.profile.name.clone())
                    .collect(),
                reason: format!(
                    "{:?} request, complexity {:.2}, ~{} tokens",
                    chars.request_type, chars.complexity, chars.token_estimate
                ),
            };
            debug!("Router: selected {}", decision.summary());
            return Ok(decision);
        }

        // Every viable provider's probe was taken concurrently.
        Ok(self.degraded_decision(strategy, chars, &snapshots, now))
    }

    /// All circuits open: pick the provider whose circuit reopens soonest.
    fn degraded_decision(
        &self,
        strategy: RoutingStrategy,
        chars: &RequestCharacteristics,
        snapshots: &[(Arc<ProviderEntry>, ProviderMetrics)],
        now: Instant,
    ) -> RoutingDecision {
        let candidates: Vec<Candidate<'_>> = snapshots
            .iter()
            .map(|(e, m)| Candidate {
                profile: e.profile(),
                metrics: m,
            })
            .collect();
        let ranked = rank(strategy, &candidates, chars, now);
        let retry_in = |c: &Candidate<'_>| c.metrics.breaker().snapshot(now).retry_in_ms;

        let (best, score) = ranked
            .iter()
            .min_by(|(a, sa), (b, sb)| {
                retry_in(a)
                    .cmp(&retry_in(b))
                    .then_with(|| sb.partial_cmp(sa).unwrap_or(std::cmp::Ordering::Equal))
            })
            .copied()
            .unwrap_or((&candidates[0], 0.0));

        if let Some(entry) = snapshots.iter().find(|(e, _)| e.profile().name == best.profile.name) {
            entry.0.lock().note_request(now);
        }

        warn!(
            "Router: all {} provider circuits open, degraded selection of '{}'",
            snapshots.len(),
            best.profile.name
        );
        RoutingDecision {
            provider: best.profile.name.clone(),
            model: best.profile.select_model(chars).to_string(),
            strategy,
            score,
            degraded: true,
            alternatives: Vec::new(),
            reason: "all provider circuits open".to_string(),
        }
    }

    /// Report one provider call. Updates latency EMA, counters, failure streak
    /// and circuit state atomically for that provider.
    pub fn record_outcome(
        &self,
        provider: &str,
        success: bool,
        latency: Duration,
        tokens: u64,
    ) -> Result<Option<Transition>, RouterError> {
        self.record_outcome_at(provider, success, latency, tokens, Instant::now())
    }

    pub fn record_outcome_at(
        &self,
        provider: &str,
        success: bool,
        latency: Duration,
        tokens: u64,
        now: Instant,
    ) -> Result<Option<Transition>, RouterError> {
        let entry = self
            .entry(provider)
            .ok_or_else(|| RouterError::UnknownProvider(provider.to_string()))?;
        let outcome = CallOutcome {
            success,
            latency,
            tokens,
        };
        let transition = entry.lock().record(&outcome, now);
        log_transition(provider, transition);
        Ok(transition)
    }

    /// Free a half-open probe slot claimed by a call that ended without
    /// reporting an outcome (cancelled or dropped).
    pub fn release_probe(&self, provider: &str) -> bool {
        let released = self
            .entry(provider)
            .is_some_and(|e| e.lock().breaker_mut().release_probe());
        if released {
            debug!("Router: probe for '{}' abandoned, slot released", provider);
        }
        released
    }

    /// Guard that calls [`release_probe`](Self::release_probe) when dropped.
    ///
    /// Releasing after an outcome was recorded is a no-op, so the guard can be
    /// held across the whole call.
    pub fn probe_guard(&self, provider: &str) -> ProbeGuard<'_> {
        ProbeGuard {
            router: self,
            provider: provider.to_string(),
        }
    }

    pub fn metrics_snapshot(&self) -> Vec<ProviderMetricsSnapshot> {
        let now = Instant::now();
        self.entries()
            .iter()
            .map(|e| e.lock().snapshot(&e.profile().name, now))
            .collect()
    }

    /// Probe every provider concurrently and feed the results into its metrics.
    pub async fn health_check_all(&self) -> Vec<(String, bool)> {
        let entries = self.entries();
        let checks = entries.iter().map(|e| {
            let client = Arc::clone(&e.client);
            async move {
                let started = Instant::now();
                let result = client.health_check().await;
                (client.profile().name.clone(), result, started.elapsed())
            }
        });

        let mut report = Vec::new();
        for (name, result, elapsed) in join_all(checks).await {
            let ok = result.is_ok();
            if let Err(e) = &result {
                warn!("Router: health check failed for '{}': {}", name, e);
            }
            let _ = self.record_outcome(&name, ok, elapsed, 0);
            report.push((name, ok));
        }
        report
    }
}

/// See [`AdaptiveRouter::probe_guard`].
pub struct ProbeGuard<'a> {
    router: &'a AdaptiveRouter,
    provider: String,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.router.release_probe(&self.provider);
    }
}

fn log_transition(provider: &str, transition: Option<Transition>) {
    match transition {
        Some(Transition::Opened) => warn!("Router: circuit opened for provider '{}'", provider),
        Some(Transition::Reopened) => {
            warn!("Router: probe failed, circuit reopened for provider '{}'", provider)
        }
        Some(Transition::HalfOpened) => {
            info!("Router: circuit half-open for provider '{}', probing", provider)
        }
        Some(Transition::Closed) => info!("Router: circuit closed for provider '{}'", provider),
        None => {}
    }
}
