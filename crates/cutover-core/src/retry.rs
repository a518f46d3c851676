//! Retry with exponential backoff and jitter
//!
//! Used where the harness talks to a service that may still be settling: the
//! freshly launched control plane, and workloads converging on a state.
//!
//! # Example
//!
//! ```ignore
//! use cutover_core::retry::{retry_with_backoff, RetryConfig};
//!
//! let control = retry_with_backoff(
//!     &RetryConfig::with_max_attempts(5),
//!     "login",
//!     ControlPlaneError::is_retryable,
//!     || HttpControlPlane::login(config.clone()),
//! ).await?;
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts in total, the first one included
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. Returns the last error in the latter two cases.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !retryable(&e) {
            return Err(e);
        }
        if attempt >= config.max_attempts.max(1) {
            error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
            return Err(e);
        }

        // 0.5x to 1.5x of the nominal delay
        let jitter = rand::rng().random_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered.as_millis(),
            "operation failed, retrying"
        );
        tokio::time::sleep(jittered).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
