//! The cascade router: classify, pick a tier order, try each tier, and
//! format the winner.
//!
//! `handle` never raises. Disabled or misconfigured tiers are skipped
//! silently; a tier that errors sends the cascade to the next one; when
//! everything fails the player gets the fixed service-unavailable reply.
//! Every attempt honors a total deadline and a per-tier deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use kotoba_types::request::{AssistRequest, AssistResponse, InteractionLog, Tier};

use crate::classify::IntentClassifier;
use crate::formatter::{FormatOptions, ResponseFormatter};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::tiers::{messages, Processor};

/// Why a tier's processor could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The tier is switched off in configuration.
    Disabled,
    /// No processor was registered for the tier.
    Misconfigured,
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquireError::Disabled => write!(f, "tier disabled"),
            AcquireError::Misconfigured => write!(f, "no processor registered"),
        }
    }
}

/// Holds the processors the router may dispatch to.
///
/// Construction is explicit: tests build a registry with exactly the
/// processors (or mocks) they need.
#[derive(Default)]
pub struct ProcessorRegistry {
    tier1: Option<Arc<dyn Processor>>,
    tier2: Option<Arc<dyn Processor>>,
    tier3: Option<Arc<dyn Processor>>,
    tier1_enabled: bool,
    tier2_enabled: bool,
    tier3_enabled: bool,
}

impl ProcessorRegistry {
    /// An empty registry with every tier enabled but nothing registered.
    pub fn new() -> Self {
        Self {
            tier1: None,
            tier2: None,
            tier3: None,
            tier1_enabled: true,
            tier2_enabled: true,
            tier3_enabled: true,
        }
    }

    /// Register a processor under its own tier.
    pub fn register(mut self, processor: Arc<dyn Processor>) -> Self {
        match processor.tier() {
            Tier::Tier1 => self.tier1 = Some(processor),
            Tier::Tier2 => self.tier2 = Some(processor),
            Tier::Tier3 => self.tier3 = Some(processor),
        }
        self
    }

    /// Set a tier's enablement flag.
    pub fn set_enabled(mut self, tier: Tier, enabled: bool) -> Self {
        match tier {
            Tier::Tier1 => self.tier1_enabled = enabled,
            Tier::Tier2 => self.tier2_enabled = enabled,
            Tier::Tier3 => self.tier3_enabled = enabled,
        }
        self
    }

    /// The processor for `tier`, or why it is unavailable.
    pub fn acquire(&self, tier: Tier) -> Result<Arc<dyn Processor>, AcquireError> {
        let (processor, enabled) = match tier {
            Tier::Tier1 => (&self.tier1, self.tier1_enabled),
            Tier::Tier2 => (&self.tier2, self.tier2_enabled),
            Tier::Tier3 => (&self.tier3, self.tier3_enabled),
        };
        if !enabled {
            return Err(AcquireError::Disabled);
        }
        processor.clone().ok_or(AcquireError::Misconfigured)
    }
}

/// The core's sole entry point.
pub struct CascadeRouter {
    classifier: IntentClassifier,
    registry: ProcessorRegistry,
    formatter: ResponseFormatter,
    metrics: Arc<MetricsRegistry>,
    total_timeout: Duration,
    tier_timeout: Duration,
}

impl CascadeRouter {
    /// Default whole-request deadline.
    pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default per-tier-attempt deadline.
    pub const DEFAULT_TIER_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a router.
    pub fn new(
        registry: ProcessorRegistry,
        formatter: ResponseFormatter,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            registry,
            formatter,
            metrics,
            total_timeout: Self::DEFAULT_TOTAL_TIMEOUT,
            tier_timeout: Self::DEFAULT_TIER_TIMEOUT,
        }
    }

    /// Override the request deadlines.
    pub fn with_timeouts(mut self, total: Duration, per_tier: Duration) -> Self {
        self.total_timeout = total;
        self.tier_timeout = per_tier;
        self
    }

    /// Snapshot of the shared processing counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Handle one request end to end. Never raises; always returns a
    /// non-empty, formatted reply.
    ///
    /// `log`, when provided, receives the request and the formatted
    /// response; it is the caller's request-scoped transcript, separate
    /// from the persistent conversation store.
    pub async fn handle(
        &self,
        request: &AssistRequest,
        log: Option<&mut InteractionLog>,
    ) -> String {
        let start = Instant::now();
        info!(
            request_id = %request.request_id,
            input = %request.player_input,
            "handling request"
        );

        let mut classified = self.classifier.classify(request);
        info!(
            request_id = %request.request_id,
            intent = classified.intent.label(),
            tier = classified.preferred_tier.label(),
            confidence = classified.confidence,
            "request classified"
        );

        let mut outcome: Option<(Tier, String)> = None;
        for tier in classified.preferred_tier.cascade_order() {
            let remaining = self.total_timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                warn!(request_id = %request.request_id, "request deadline exhausted");
                break;
            }

            let processor = match self.registry.acquire(tier) {
                Ok(processor) => processor,
                Err(reason) => {
                    debug!(
                        request_id = %request.request_id,
                        tier = tier.label(),
                        %reason,
                        "skipping tier"
                    );
                    continue;
                }
            };

            let attempt_timeout = self.tier_timeout.min(remaining);
            match tokio::time::timeout(attempt_timeout, processor.process(&mut classified)).await
            {
                Ok(Ok(reply)) if !reply.is_empty() => {
                    outcome = Some((tier, reply));
                    break;
                }
                Ok(Ok(_)) => {
                    debug!(
                        request_id = %request.request_id,
                        tier = tier.label(),
                        "tier returned empty reply, cascading"
                    );
                }
                Ok(Err(error)) => {
                    warn!(
                        request_id = %request.request_id,
                        tier = tier.label(),
                        %error,
                        "tier failed, cascading"
                    );
                }
                Err(_) => {
                    warn!(
                        request_id = %request.request_id,
                        tier = tier.label(),
                        timeout_ms = attempt_timeout.as_millis() as u64,
                        "tier attempt timed out, cascading"
                    );
                    self.metrics.track_failure(tier.label(), "timeout");
                }
            }
        }

        let (tier, raw) = outcome.unwrap_or_else(|| {
            warn!(request_id = %request.request_id, "all tiers failed");
            (
                classified.preferred_tier,
                messages::SERVICE_UNAVAILABLE.to_string(),
            )
        });

        let formatted = self
            .formatter
            .format(&raw, &classified, &FormatOptions::default());

        if let Some(log) = log {
            log.add_interaction(
                request.clone(),
                AssistResponse {
                    request_id: request.request_id.clone(),
                    response_text: formatted.clone(),
                    intent: classified.intent,
                    tier,
                    timestamp: Utc::now(),
                },
            );
        }

        info!(
            request_id = %request.request_id,
            tier = tier.label(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request handled"
        );
        formatted
    }
}
