//! Exponential-backoff retry driver.
//!
//! [`retry_async`] runs an operation up to `1 + max_retries` times,
//! sleeping between attempts with exponential backoff and optional
//! jitter. Whether an error is worth retrying is decided by the caller's
//! predicate, so each tier can bring its own policy.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use kotoba_types::config::RetryParams;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt (default: 3).
    pub max_retries: u32,
    /// Base delay before the first retry (default: 1 second).
    pub base_delay: Duration,
    /// Ceiling on the computed delay (default: 10 seconds).
    pub max_delay: Duration,
    /// Multiplier applied per attempt (default: 2.0).
    pub backoff_factor: f64,
    /// Whether to jitter the computed delay (default: true).
    pub jitter: bool,
    /// Jitter amplitude: the delay is multiplied by a random value in
    /// `[1 - jitter_factor, 1 + jitter_factor]` (default: 0.2).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Build from the configuration-file parameters.
    pub fn from_params(params: &RetryParams) -> Self {
        Self {
            max_retries: params.max_retries,
            base_delay: Duration::from_secs_f64(params.base_delay_s.max(0.0)),
            max_delay: Duration::from_secs_f64(params.max_delay_s.max(0.0)),
            backoff_factor: params.backoff_factor,
            jitter: params.jitter_factor > 0.0,
            jitter_factor: params.jitter_factor,
        }
    }

    /// A no-delay configuration for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: false,
            jitter_factor: 0.0,
        }
    }
}

/// Delay before retry number `attempt` (0-indexed).
///
/// `min(base_delay * backoff_factor^attempt, max_delay)`, multiplied by a
/// random value in `[1 - jitter_factor, 1 + jitter_factor]` when jitter
/// is enabled.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.backoff_factor.powi(attempt as i32);
    let raw = config.base_delay.as_secs_f64() * exp;
    let capped = raw.min(config.max_delay.as_secs_f64());

    let jittered = if config.jitter && config.jitter_factor > 0.0 {
        let factor = rand::thread_rng()
            .gen_range(1.0 - config.jitter_factor..=1.0 + config.jitter_factor);
        capped * factor
    } else {
        capped
    };

    Duration::from_secs_f64(jittered.max(0.0))
}

/// Run `op` with retries.
///
/// After a failed attempt the error is passed to `retry_on`; when it
/// returns `true` and retries remain, the driver sleeps per
/// [`compute_delay`] and tries again. Otherwise the error is returned.
pub async fn retry_async<T, E, F, Fut, P>(mut op: F, config: &RetryConfig, retry_on: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= config.max_retries || !retry_on(&err) {
                    return Err(err);
                }
                let delay = compute_delay(config, attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
