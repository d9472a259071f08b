//! Condition waiting with exponential backoff.
//!
//! Used for staleness-store table provisioning: waiting for a table
//! mid-deletion to disappear and for a freshly created table to become
//! active. These are the only retried operations in a pass.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait; `None` retries until the condition holds
    pub timeout: Option<Duration>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl WaitConfig {
    /// Wait indefinitely; for conditions with no safe caller-level recovery,
    /// where bailing out early would leave the store unusable anyway.
    pub fn unbounded() -> Self {
        Self {
            timeout: None,
            ..Self::default()
        }
    }
}

/// The delay sequence `wait_for` sleeps through. Exposed for callers that
/// carry mutable state across attempts and so cannot use `wait_for` itself.
pub fn backoff_delays(config: &WaitConfig) -> impl Iterator<Item = Duration> {
    ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build()
        .into_iter()
}

/// Wait for a condition with exponential backoff.
///
/// `check` returns `Ok(true)` when the condition holds, `Ok(false)` to retry.
/// Errors from `check` propagate immediately.
pub async fn wait_for<F, Fut>(config: WaitConfig, check: F, what: &str) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = std::time::Instant::now();
    let mut attempts = 0u32;

    let mut delays = backoff_delays(&config);

    loop {
        attempts += 1;

        if let Some(timeout) = config.timeout {
            if start.elapsed() >= timeout {
                anyhow::bail!(
                    "timeout waiting for {} after {:?} ({} attempts)",
                    what,
                    timeout,
                    attempts
                );
            }
        }

        match check().await {
            Ok(true) => {
                debug!(what = %what, attempts, "condition met");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    what = %what,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "not ready, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(what = %what, error = ?e, "condition check failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test]
    async fn succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let result = wait_for(
            fast_config(),
            || async { Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2) },
            "test-condition",
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn propagates_check_errors() {
        let result = wait_for(
            fast_config(),
            || async { anyhow::bail!("boom") },
            "test-condition",
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn times_out() {
        let config = WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            timeout: Some(Duration::from_millis(20)),
        };

        let result = wait_for(config, || async { Ok(false) }, "never-ready").await;

        let err = result.expect_err("should time out");
        assert!(err.to_string().contains("timeout"));
    }
}
