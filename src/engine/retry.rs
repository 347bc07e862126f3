//! Exponential backoff with jitter and a generic bounded-retry helper.
//!
//! One policy drives all three retry sites: adapter fetches, store writes,
//! and alert dispatch.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::config::RetryPolicy;

/// Delay before the retry following `attempt` failures (1-based).
///
/// `base * factor^(attempt-1)`, capped, with ±`jitter` random variation to
/// avoid synchronized retries across sources.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base_secs = policy.base_delay().as_secs_f64() * policy.factor.powi(exponent);
    let capped_secs = base_secs.min(policy.cap().as_secs_f64());

    let jittered_secs = if policy.jitter > 0.0 {
        let spread = rand::thread_rng().gen_range(-policy.jitter..=policy.jitter);
        capped_secs * (1.0 + spread)
    } else {
        capped_secs
    };

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

/// Run `op` up to `policy.max_attempts` times, sleeping the backoff delay
/// between failures. Returns the last error when every attempt fails.
///
/// `should_retry` lets callers stop early on non-transient errors (e.g. an
/// out-of-domain reading is not worth refetching).
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    should_retry: R,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = backoff_delay(policy, attempt);
                warn!(
                    target: "sentinel::retry",
                    %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = no_jitter();
        assert_eq!(backoff_delay(&policy, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_secs(4));
        // 2^9 = 512s, capped at 60s
        assert_eq!(backoff_delay(&policy, 10), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = backoff_delay(&policy, 2).as_secs_f64();
            assert!((1.6..=2.4).contains(&delay), "delay {delay} out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&no_jitter(), "test", |_| true, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_backoff(&policy, "test", |_| true, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still down".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_backoff(&no_jitter(), "test", |_| false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad domain".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
