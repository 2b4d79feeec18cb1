//! Usage ledger for the remote tier.
//!
//! Every remote call is recorded; admission is checked against three
//! rolling windows before dispatch: tokens per 24 hours, requests per
//! hour, and cost per 30 days. Only successful records contribute to
//! token and cost aggregates; every record contributes to the request
//! count.
//!
//! `check_quota` and `record` are deliberately not atomic with respect
//! to each other: a request admitted between them may overshoot a limit
//! slightly, and the next check corrects for it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use kotoba_types::config::{CostRate, QuotaConfig};

/// One remote call, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// When the call completed.
    pub timestamp: DateTime<Utc>,

    /// Id of the request that triggered the call.
    pub request_id: String,

    /// The model that was invoked.
    pub model_id: String,

    /// Prompt tokens consumed.
    pub input_tokens: u64,

    /// Completion tokens produced (0 for failures).
    pub output_tokens: u64,

    /// Wall-clock duration of the call.
    pub duration_ms: u64,

    /// Whether the call produced a usable response.
    pub success: bool,

    /// Error kind label for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl UsageRecord {
    /// A successful record stamped with the current time.
    pub fn success(
        request_id: impl Into<String>,
        model_id: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            model_id: model_id.into(),
            input_tokens,
            output_tokens,
            duration_ms,
            success: true,
            error_kind: None,
        }
    }

    /// A failed record stamped with the current time. Input tokens are
    /// counted; output tokens are zero.
    pub fn failure(
        request_id: impl Into<String>,
        model_id: impl Into<String>,
        input_tokens: u64,
        duration_ms: u64,
        error_kind: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            model_id: model_id.into(),
            input_tokens,
            output_tokens: 0,
            duration_ms,
            success: false,
            error_kind: Some(error_kind.into()),
        }
    }
}

/// Aggregates for one rolling window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowUsage {
    /// Requests in the window (successes and failures).
    pub requests: u64,
    /// Tokens consumed by successful calls.
    pub tokens: u64,
    /// Dollars spent by successful calls.
    pub cost: f64,
}

/// Aggregates for one model over the ledger's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelUsage {
    /// Requests made to the model.
    pub requests: u64,
    /// Input tokens from successful calls.
    pub input_tokens: u64,
    /// Output tokens from successful calls.
    pub output_tokens: u64,
    /// Dollars spent on successful calls.
    pub cost: f64,
}

/// Current standing against each quota limit.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    /// Tokens used in the last 24 hours vs. the daily limit.
    pub daily_tokens_used: u64,
    pub daily_token_limit: u64,
    /// Requests made in the last hour vs. the hourly limit.
    pub hourly_requests_used: u64,
    pub hourly_request_limit: u64,
    /// Dollars spent in the last 30 days vs. the monthly limit.
    pub monthly_cost_used: f64,
    pub monthly_cost_limit: f64,
}

/// The full usage summary exposed through `metrics()`.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    /// Lifetime request count.
    pub total_requests: u64,
    /// Rolling 24-hour window.
    pub daily: WindowUsage,
    /// Rolling 7-day window.
    pub weekly: WindowUsage,
    /// Rolling 30-day window.
    pub monthly: WindowUsage,
    /// Lifetime aggregates per model.
    pub per_model: HashMap<String, ModelUsage>,
    /// Standing against the configured limits.
    pub quota_status: QuotaStatus,
}

/// Append-only usage ledger with quota admission control.
///
/// All operations are serialized through an internal lock; readers get a
/// consistent snapshot. Persistence is optional: with a storage path the
/// record vector is flushed to a JSON file after every append and loaded
/// back on construction.
pub struct UsageLedger {
    quota: QuotaConfig,
    records: Mutex<Vec<UsageRecord>>,
    storage_path: Option<PathBuf>,
}

impl UsageLedger {
    /// An in-memory ledger (the test default).
    pub fn new(quota: QuotaConfig) -> Self {
        Self {
            quota,
            records: Mutex::new(Vec::new()),
            storage_path: None,
        }
    }

    /// A ledger backed by a JSON file. Existing records are loaded;
    /// a missing or unreadable file starts empty.
    pub fn with_storage(quota: QuotaConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<UsageRecord>>(&raw) {
                Ok(records) => {
                    debug!(count = records.len(), path = %path.display(), "loaded usage records");
                    records
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed usage file, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            quota,
            records: Mutex::new(records),
            storage_path: Some(path),
        }
    }

    /// The configured quota.
    pub fn quota(&self) -> &QuotaConfig {
        &self.quota
    }

    /// Append a record (and flush when persistence is configured).
    pub async fn record(&self, record: UsageRecord) {
        let mut records = self.records.lock().await;
        records.push(record);
        if let Some(path) = &self.storage_path {
            match serde_json::to_vec_pretty(&*records) {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!(path = %path.display(), error = %e, "failed to persist usage records");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize usage records"),
            }
        }
    }

    /// Would admitting a call with `estimated_tokens` stay within every
    /// limit? Returns `(allowed, reason)`.
    pub async fn check_quota(&self, model_id: &str, estimated_tokens: u64) -> (bool, String) {
        let records = self.records.lock().await;
        let now = Utc::now();

        let daily_tokens = tokens_in_window(&records, now, Duration::hours(24));
        if daily_tokens + estimated_tokens > self.quota.daily_token_limit {
            return (
                false,
                format!(
                    "daily token limit exceeded: {daily_tokens} used + {estimated_tokens} \
                     requested > {}",
                    self.quota.daily_token_limit
                ),
            );
        }

        let hourly_requests = requests_in_window(&records, now, Duration::hours(1));
        if hourly_requests + 1 > self.quota.hourly_request_limit {
            return (
                false,
                format!(
                    "hourly request limit exceeded: {hourly_requests} used of {}",
                    self.quota.hourly_request_limit
                ),
            );
        }

        let monthly_cost = self.cost_in_window(&records, now, Duration::days(30));
        let estimated_cost = self.cost_of(model_id, estimated_tokens, 0);
        if monthly_cost + estimated_cost > self.quota.monthly_cost_limit {
            return (
                false,
                format!(
                    "monthly cost limit exceeded: ${monthly_cost:.4} used + \
                     ${estimated_cost:.4} requested > ${:.2}",
                    self.quota.monthly_cost_limit
                ),
            );
        }

        (true, "quota check passed".into())
    }

    /// A consistent snapshot of totals, windows, and per-model usage.
    pub async fn summary(&self) -> UsageSummary {
        let records = self.records.lock().await;
        let now = Utc::now();

        let mut per_model: HashMap<String, ModelUsage> = HashMap::new();
        for record in records.iter() {
            let usage = per_model.entry(record.model_id.clone()).or_default();
            usage.requests += 1;
            if record.success {
                usage.input_tokens += record.input_tokens;
                usage.output_tokens += record.output_tokens;
                usage.cost += self.cost_of(&record.model_id, record.input_tokens, record.output_tokens);
            }
        }

        let daily = self.window(&records, now, Duration::hours(24));
        let weekly = self.window(&records, now, Duration::days(7));
        let monthly = self.window(&records, now, Duration::days(30));

        UsageSummary {
            total_requests: records.len() as u64,
            quota_status: QuotaStatus {
                daily_tokens_used: daily.tokens,
                daily_token_limit: self.quota.daily_token_limit,
                hourly_requests_used: requests_in_window(&records, now, Duration::hours(1)),
                hourly_request_limit: self.quota.hourly_request_limit,
                monthly_cost_used: monthly.cost,
                monthly_cost_limit: self.quota.monthly_cost_limit,
            },
            daily,
            weekly,
            monthly,
            per_model,
        }
    }

    /// Dollar cost of a call against this ledger's rate table.
    ///
    /// `(input/1000) * rate.input + (output/1000) * rate.output`; unknown
    /// models use the configured default rate.
    pub fn cost_of(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let rate = self.rate_for(model_id);
        (input_tokens as f64 / 1000.0) * rate.input + (output_tokens as f64 / 1000.0) * rate.output
    }

    fn rate_for(&self, model_id: &str) -> CostRate {
        self.quota
            .cost_rates
            .get(model_id)
            .copied()
            .unwrap_or(self.quota.default_rate)
    }

    fn window(&self, records: &[UsageRecord], now: DateTime<Utc>, span: Duration) -> WindowUsage {
        WindowUsage {
            requests: requests_in_window(records, now, span),
            tokens: tokens_in_window(records, now, span),
            cost: self.cost_in_window(records, now, span),
        }
    }

    fn cost_in_window(&self, records: &[UsageRecord], now: DateTime<Utc>, span: Duration) -> f64 {
        records
            .iter()
            .filter(|r| r.success && now - r.timestamp <= span)
            .map(|r| self.cost_of(&r.model_id, r.input_tokens, r.output_tokens))
            .sum()
    }
}

fn tokens_in_window(records: &[UsageRecord], now: DateTime<Utc>, span: Duration) -> u64 {
    records
        .iter()
        .filter(|r| r.success && now - r.timestamp <= span)
        .map(|r| r.input_tokens + r.output_tokens)
        .sum()
}

fn requests_in_window(records: &[UsageRecord], now: DateTime<Utc>, span: Duration) -> u64 {
    records
        .iter()
        .filter(|r| now - r.timestamp <= span)
        .count() as u64
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger")
            .field("storage_path", &self.storage_path)
            .finish()
    }
}

/// Rough token estimate used before dispatch: characters / 4, at least 1.
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() / 4) as u64).max(1)
}
