//! Per-tier processing counters.
//!
//! A single [`MetricsRegistry`] is shared by the processors and the
//! router; `snapshot()` returns a serializable view for the `metrics()`
//! accessor. Counters never affect control flow.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

/// Counters for one tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierCounters {
    /// Requests routed to the tier.
    pub requests: u64,
    /// Requests that produced a response.
    pub successes: u64,
    /// Failures by error kind.
    pub failures: HashMap<String, u64>,
    /// Retries by attempt number.
    pub retries: HashMap<u32, u64>,
    /// Fallbacks by target ("tier1", "simpler_model", "default_response").
    pub fallbacks: HashMap<String, u64>,
    /// Mean response time in milliseconds.
    pub mean_response_ms: f64,
    #[serde(skip)]
    total_response_ms: u64,
    #[serde(skip)]
    timed_responses: u64,
}

/// Snapshot of every tier's counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Counters keyed by tier label.
    pub tiers: HashMap<String, TierCounters>,
}

impl MetricsSnapshot {
    /// Requests counter for `tier` (0 when the tier never ran).
    pub fn requests(&self, tier: &str) -> u64 {
        self.tiers.get(tier).map(|t| t.requests).unwrap_or(0)
    }

    /// Fallback counter for `tier` -> `target`.
    pub fn fallbacks(&self, tier: &str, target: &str) -> u64 {
        self.tiers
            .get(tier)
            .and_then(|t| t.fallbacks.get(target))
            .copied()
            .unwrap_or(0)
    }

    /// Failure counter for `tier` -> `kind`.
    pub fn failures(&self, tier: &str, kind: &str) -> u64 {
        self.tiers
            .get(tier)
            .and_then(|t| t.failures.get(kind))
            .copied()
            .unwrap_or(0)
    }
}

/// Shared counter registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    tiers: Mutex<HashMap<String, TierCounters>>,
}

impl MetricsRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request routed to `tier`.
    pub fn track_request(&self, tier: &str) {
        self.with(tier, |counters| counters.requests += 1);
    }

    /// Count a success or failure outcome for `tier`.
    pub fn track_success(&self, tier: &str, success: bool) {
        if success {
            self.with(tier, |counters| counters.successes += 1);
        }
    }

    /// Count a failure of `kind` for `tier`.
    pub fn track_failure(&self, tier: &str, kind: &str) {
        self.with(tier, |counters| {
            *counters.failures.entry(kind.to_string()).or_default() += 1;
        });
    }

    /// Count retry number `attempt` for `tier`.
    pub fn track_retry(&self, tier: &str, attempt: u32) {
        self.with(tier, |counters| {
            *counters.retries.entry(attempt).or_default() += 1;
        });
    }

    /// Count a fallback from `tier` to `target`.
    pub fn track_fallback(&self, tier: &str, target: &str) {
        self.with(tier, |counters| {
            *counters.fallbacks.entry(target.to_string()).or_default() += 1;
        });
    }

    /// Fold a response time into the tier's mean.
    pub fn track_response_time(&self, tier: &str, millis: u64) {
        self.with(tier, |counters| {
            counters.total_response_ms += millis;
            counters.timed_responses += 1;
            counters.mean_response_ms =
                counters.total_response_ms as f64 / counters.timed_responses as f64;
        });
    }

    /// A consistent snapshot of every tier.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            tiers: tiers.clone(),
        }
    }

    fn with(&self, tier: &str, update: impl FnOnce(&mut TierCounters)) {
        let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        update(tiers.entry(tier.to_string()).or_default());
    }
}
