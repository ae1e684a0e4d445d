//! Bounded retries with exponential backoff for calls to the cluster. Each failed attempt is
//! logged with the label of the operation and the normalized error message.
use crate::error::ToFailure;

use backoff::backoff::Backoff;

use std::future::Future;
use std::time::Duration;

/// Configuration that determines the behavior of an exponential backoff. The `Default` impl
/// uses an `initial_interval` of 500 milliseconds, a `max_interval` of 5 seconds, a multiplier
/// of 3, and a randomization factor of 0.5.
///
/// ```rust
/// use k8s_deployer::runner::reconcile::BackoffConfig;
/// use std::time::Duration;
///
/// let backoff_config = BackoffConfig {
///     max_interval: Duration::from_secs(30),
///     ..Default::default()
/// };
///
/// assert_eq!(Duration::from_secs(30), backoff_config.max_interval);
/// assert_eq!(Duration::from_millis(500), backoff_config.initial_interval);
/// assert_eq!(3.0, backoff_config.multiplier);
/// assert_eq!(0.5, backoff_config.randomization_factor);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// The backoff after the first failure. Each subsequent backoff is multiplied by the
    /// `multiplier`, before applying the random jitter.
    pub initial_interval: Duration,

    /// The maximum interval that will ever be returned by a backoff
    pub max_interval: Duration,

    pub multiplier: f64,

    /// Varies each backoff duration by at most this factor in either direction
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            multiplier: 3.0,
            randomization_factor: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Sets backoff to always be at a fixed interval, without randomization
    pub fn fixed_interval(interval: Duration) -> BackoffConfig {
        BackoffConfig {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            randomization_factor: 0.0,
        }
    }

    fn new_backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            randomization_factor: self.randomization_factor,
            start_time: std::time::Instant::now(),
            ..Default::default()
        }
    }
}

/// How many times to attempt an operation, and how long to wait between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// The total number of attempts, including the first. Values less than 1 are treated as 1.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 6,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Makes a single attempt
    pub fn never_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }

    /// Makes up to `max_attempts` attempts without waiting in between. Mostly useful for tests.
    pub fn immediate(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffConfig::fixed_interval(Duration::from_millis(0)),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum RetryOutcome<T, E> {
    Succeeded(T),
    Exhausted { attempts: u32, last_error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Succeeded(value) => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Invokes `op` until it succeeds or the policy's attempts are used up. The `label` identifies
/// the operation in the logs, for example `create ingress hounds-of-love/cloudbusting`.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ToFailure,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff.new_backoff();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    log::debug!("'{}' succeeded on attempt {}", label, attempt);
                }
                return RetryOutcome::Succeeded(value);
            }
            Err(err) => {
                log::warn!(
                    "Attempt {} of {} to {} failed: {}",
                    attempt,
                    max_attempts,
                    label,
                    err.to_failure()
                );
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    };
                }
                let delay = backoff.next_backoff().unwrap_or(policy.backoff.max_interval);
                log::debug!("Retrying '{}' in {}ms", label, delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
