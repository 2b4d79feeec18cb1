//! Configuration schema.
//!
//! A single [`KotobaConfig`] is loaded once at process start (YAML).
//! Every field carries a serde default so partial files work; unknown
//! keys are silently ignored for forward compatibility. The `Default`
//! impls agree with the serde defaults.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for the kotoba engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KotobaConfig {
    /// Rule-based tier settings.
    #[serde(default)]
    pub tier1: TierConfig,

    /// Local-model tier settings.
    #[serde(default)]
    pub tier2: TierConfig,

    /// Remote-model tier settings.
    #[serde(default)]
    pub tier3: TierConfig,

    /// Local model endpoint and cache.
    #[serde(default)]
    pub local_model: LocalModelConfig,

    /// Remote model endpoint.
    #[serde(default)]
    pub remote_model: RemoteModelConfig,

    /// Remote-tier admission quotas.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Conversation history bounds.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Retry/backoff parameters shared by the model tiers.
    #[serde(default)]
    pub retry: RetryParams,
}

impl KotobaConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration file. Missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }
}

// ── Tiers ────────────────────────────────────────────────────────────────

/// Per-tier enablement and model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Whether this tier may be used at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Default model for this tier (unused by tier 1).
    #[serde(default)]
    pub default_model: Option<String>,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens to generate.
    #[serde(default = "default_tier_max_tokens")]
    pub max_tokens: u32,
}

fn default_enabled() -> bool {
    true
}
fn default_temperature() -> f64 {
    0.7
}
fn default_tier_max_tokens() -> u32 {
    500
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_model: None,
            temperature: default_temperature(),
            max_tokens: default_tier_max_tokens(),
        }
    }
}

// ── Local model ──────────────────────────────────────────────────────────

/// Local model endpoint and response-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    /// Base URL of the local model server.
    #[serde(default = "default_local_base_url")]
    pub base_url: String,

    /// Model used when the tier does not override it.
    #[serde(default = "default_local_model")]
    pub default_model: String,

    /// Larger model used for complex requests.
    #[serde(default = "default_local_complex_model")]
    pub complex_model: String,

    /// Whether the two-layer response cache is active.
    #[serde(default = "default_enabled")]
    pub cache_enabled: bool,

    /// Directory for on-disk cache entries.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Time-to-live for cache entries, seconds.
    #[serde(default = "default_cache_ttl_s")]
    pub cache_ttl_s: u64,

    /// Maximum in-memory cache entries before age-based eviction.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,

    /// Maximum on-disk cache size in bytes before size-based pruning.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,
}

fn default_local_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_local_model() -> String {
    "llama3".into()
}
fn default_local_complex_model() -> String {
    "llama3:16b".into()
}
fn default_cache_dir() -> String {
    "~/.kotoba/model_cache".into()
}
fn default_cache_ttl_s() -> u64 {
    86_400
}
fn default_max_cache_entries() -> usize {
    1000
}
fn default_max_cache_bytes() -> u64 {
    100 * 1024 * 1024
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_local_base_url(),
            default_model: default_local_model(),
            complex_model: default_local_complex_model(),
            cache_enabled: default_enabled(),
            cache_dir: default_cache_dir(),
            cache_ttl_s: default_cache_ttl_s(),
            max_cache_entries: default_max_cache_entries(),
            max_cache_bytes: default_max_cache_bytes(),
        }
    }
}

// ── Remote model ─────────────────────────────────────────────────────────

/// Remote model endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteModelConfig {
    /// Endpoint host of the remote model service.
    #[serde(default = "default_remote_endpoint")]
    pub endpoint: String,

    /// Service region (part of the signing scope).
    #[serde(default = "default_remote_region")]
    pub region: String,

    /// Default remote model id.
    #[serde(default = "default_remote_model")]
    pub default_model: String,

    /// Maximum tokens to generate.
    #[serde(default = "default_remote_max_tokens")]
    pub max_tokens: u32,
}

fn default_remote_endpoint() -> String {
    "https://model-runtime.us-east-1.example.com".into()
}
fn default_remote_region() -> String {
    "us-east-1".into()
}
fn default_remote_model() -> String {
    "anthropic.claude-3-sonnet".into()
}
fn default_remote_max_tokens() -> u32 {
    1024
}

impl Default for RemoteModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_remote_endpoint(),
            region: default_remote_region(),
            default_model: default_remote_model(),
            max_tokens: default_remote_max_tokens(),
        }
    }
}

// ── Quotas ───────────────────────────────────────────────────────────────

/// Cost rates for one model, dollars per 1k tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRate {
    /// Cost per 1000 input tokens.
    pub input: f64,

    /// Cost per 1000 output tokens.
    pub output: f64,
}

/// Remote-tier admission quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Tokens admitted per rolling 24 hours.
    #[serde(default = "default_daily_token_limit")]
    pub daily_token_limit: u64,

    /// Requests admitted per rolling hour.
    #[serde(default = "default_hourly_request_limit")]
    pub hourly_request_limit: u64,

    /// Dollars admitted per rolling 30 days.
    #[serde(default = "default_monthly_cost_limit")]
    pub monthly_cost_limit: f64,

    /// Per-model cost rates.
    #[serde(default = "default_cost_rates")]
    pub cost_rates: HashMap<String, CostRate>,

    /// Rate applied to models missing from `cost_rates`.
    #[serde(default = "default_fallback_rate")]
    pub default_rate: CostRate,
}

fn default_daily_token_limit() -> u64 {
    100_000
}
fn default_hourly_request_limit() -> u64 {
    100
}
fn default_monthly_cost_limit() -> f64 {
    50.0
}
fn default_cost_rates() -> HashMap<String, CostRate> {
    HashMap::from([
        (
            "anthropic.claude-3-sonnet".into(),
            CostRate {
                input: 0.003,
                output: 0.015,
            },
        ),
        (
            "anthropic.claude-3-haiku".into(),
            CostRate {
                input: 0.00025,
                output: 0.00125,
            },
        ),
        (
            "amazon.nova-micro".into(),
            CostRate {
                input: 0.0003,
                output: 0.0006,
            },
        ),
    ])
}
fn default_fallback_rate() -> CostRate {
    CostRate {
        input: 0.001,
        output: 0.002,
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_token_limit: default_daily_token_limit(),
            hourly_request_limit: default_hourly_request_limit(),
            monthly_cost_limit: default_monthly_cost_limit(),
            cost_rates: default_cost_rates(),
            default_rate: default_fallback_rate(),
        }
    }
}

// ── Conversation ─────────────────────────────────────────────────────────

/// Conversation history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum entries retained per conversation.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Contexts idle longer than this many days are garbage collected.
    #[serde(default = "default_cleanup_age_days")]
    pub cleanup_age_days: u32,

    /// Directory for durable conversation files; in-memory when unset.
    #[serde(default)]
    pub storage_dir: Option<String>,
}

fn default_max_history() -> usize {
    10
}
fn default_cleanup_age_days() -> u32 {
    30
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            cleanup_age_days: default_cleanup_age_days(),
            storage_dir: None,
        }
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Retry/backoff parameters shared by the model tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryParams {
    /// Retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in seconds.
    #[serde(default = "default_base_delay_s")]
    pub base_delay_s: f64,

    /// Delay ceiling in seconds.
    #[serde(default = "default_max_delay_s")]
    pub max_delay_s: f64,

    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Jitter amplitude: delay is multiplied by a random value in
    /// `[1 - jitter_factor, 1 + jitter_factor]`.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_s() -> f64 {
    1.0
}
fn default_max_delay_s() -> f64 {
    10.0
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_s: default_base_delay_s(),
            max_delay_s: default_max_delay_s(),
            backoff_factor: default_backoff_factor(),
            jitter_factor: default_jitter_factor(),
        }
    }
}
