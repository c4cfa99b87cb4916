//! Exponential backoff with jitter for transient failures.

use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};
use zmirror_core::{Error, Result};
use zmirror_transport::CancellationToken;

/// Retry budget applied to each outer operation.
///
/// The sleep before attempt `k+1` is drawn from
/// `Uniform(min_sleep, min_sleep * 2^k)` and clamped to `max_sleep`; the
/// operation is abandoned once `max_elapsed` has passed since its first
/// attempt. The budget resets per outer operation, so a later dataset gets
/// a fresh allowance.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Number of re-attempts after the first failure.
    pub retries: u32,
    /// Lower bound of every sleep.
    pub min_sleep: Duration,
    /// Upper clamp of every sleep.
    pub max_sleep: Duration,
    /// Wall-clock cap across all attempts of one operation.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            min_sleep: Duration::from_millis(125),
            max_sleep: Duration::from_secs(5 * 60),
            max_elapsed: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Sleep duration before retry `attempt` (1-based).
    #[must_use]
    pub fn sleep_for_attempt(&self, attempt: u32) -> Duration {
        let min = self.min_sleep.as_secs_f64();
        let exponent = attempt.saturating_sub(1).min(32);
        let ceiling = (min * f64::from(1u32 << exponent.min(31)))
            .min(self.max_sleep.as_secs_f64());
        if ceiling <= min {
            return self.min_sleep.min(self.max_sleep);
        }
        let span = ceiling - min;
        Duration::from_secs_f64(min + span * clock_jitter())
    }
}

/// Runs `operation`, retrying categorized-transient failures under `policy`.
///
/// # Errors
///
/// Returns the last error once the retry count or the elapsed budget is
/// exhausted, or immediately for non-retryable errors and cancellation.
pub fn with_retries<T, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        cancel.check()?;
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt > policy.retries {
                    return Err(err);
                }
                if started.elapsed() >= policy.max_elapsed {
                    warn!(operation = label, "retry budget elapsed, giving up");
                    return Err(err);
                }
                let sleep = policy.sleep_for_attempt(attempt);
                debug!(
                    operation = label,
                    attempt,
                    sleep_ms = sleep.as_millis() as u64,
                    %err,
                    "transient failure, retrying"
                );
                interruptible_sleep(cancel, sleep)?;
            }
        }
    }
}

/// Sleeps in small slices so cancellation stays responsive.
fn interruptible_sleep(cancel: &CancellationToken, total: Duration) -> Result<()> {
    const SLICE: Duration = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    loop {
        cancel.check().map_err(|_| Error::Cancelled)?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}

/// Uniform-ish jitter in `[0, 1)` derived from the clock; good enough to
/// decorrelate concurrent invocations without pulling in an RNG.
fn clock_jitter() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            min_sleep: Duration::from_millis(1),
            max_sleep: Duration::from_millis(4),
            max_elapsed: Duration::from_secs(5),
        }
    }

    fn transient() -> Error {
        Error::command_failed(vec!["zfs".into()], "exit code 1".into(), "dataset is busy")
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut remaining_failures = 2;
        let result = with_retries(&fast_policy(3), &CancellationToken::new(), "test", || {
            if remaining_failures > 0 {
                remaining_failures -= 1;
                Err(transient())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.expect("succeeds eventually"), 42);
    }

    #[test]
    fn exhausted_retries_return_the_last_error() {
        let mut attempts = 0;
        let result: Result<()> =
            with_retries(&fast_policy(2), &CancellationToken::new(), "test", || {
                attempts += 1;
                Err(transient())
            });
        assert!(result.is_err());
        assert_eq!(attempts, 3, "one initial try plus two retries");
    }

    #[test]
    fn non_retryable_errors_fail_fast() {
        let mut attempts = 0;
        let result: Result<()> =
            with_retries(&fast_policy(5), &CancellationToken::new(), "test", || {
                attempts += 1;
                Err(Error::Usage("bad".into()))
            });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn cancellation_wins_over_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = with_retries(&fast_policy(5), &cancel, "test", || Ok(()));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn sleep_respects_bounds() {
        let policy = RetryPolicy {
            retries: 10,
            min_sleep: Duration::from_millis(100),
            max_sleep: Duration::from_millis(800),
            max_elapsed: Duration::from_secs(10),
        };
        for attempt in 1..=10 {
            let sleep = policy.sleep_for_attempt(attempt);
            assert!(sleep >= Duration::from_millis(100), "attempt {attempt}: {sleep:?}");
            assert!(sleep <= Duration::from_millis(800), "attempt {attempt}: {sleep:?}");
        }
    }
}
