use anyhow::{Error, Result, anyhow};
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::utils::strip_html;

pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: f64,
}

impl Default for RetryConfig {
    // A single attempt: the pipeline does not retry unless asked to
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            exponential: 2.0,
        }
    }
}

pub async fn retry<F, Fut, T>(operation: F, config: &RetryConfig, context: &str) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, Error>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.base_delay_ms;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let message = strip_html(&e.to_string());
                if attempt >= max_attempts {
                    error!(
                        "Operation '{}' failed after {} attempt(s). Final error: {}",
                        context, attempt, message
                    );
                    return Err(anyhow!(message).context(format!("Failed after {} attempt(s)", attempt)));
                }

                warn!(
                    "Attempt {}/{} for '{}' failed: {}. Retrying in {}ms...",
                    attempt, max_attempts, context, message, delay
                );

                sleep(Duration::from_millis(delay)).await;

                // Exponential backoff with full jitter
                let next_delay = delay as f64 * config.exponential;
                delay = std::cmp::min(config.max_delay_ms, (fastrand::f64() * next_delay) as u64);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            exponential: 2.0,
        }
    }

    #[tokio::test]
    async fn test_single_attempt_by_default() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("boom"))
            },
            &RetryConfig::default(),
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(anyhow!("attempt {}", n)) } else { Ok(n) }
            },
            &fast_config(5),
            "test",
        )
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
