//! Retry utilities: exponential backoff for transient failures and the
//! optimistic-concurrency update loop for shared status objects.
//!
//! Every status write issued by the controller goes through
//! [`update_on_conflict`]. It re-fetches the object on each round so a stale
//! mutation is never re-applied, and it is bounded so contention surfaces as
//! a retryable [`Error::Conflict`] instead of a livelock.
//!
//! # Example
//!
//! ```ignore
//! use cachegrid_common::retry::{update_on_conflict, RetryConfig};
//!
//! let outcome = update_on_conflict(
//!     &RetryConfig::for_conflicts(),
//!     "mark_master_ready",
//!     || client.get_runtime(&ns, &name),
//!     |runtime| { apply(runtime); Ok(()) },
//!     |runtime| client.patch_runtime_status(runtime),
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::{metrics, Error, Result};

/// Attempts used by [`update_on_conflict`] when a config asks for "infinite"
pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 5;

/// Configuration for operations that may fail transiently.
///
/// Used for external calls (K8s API) to handle transient failures with
/// exponential backoff and jitter.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite for [`retry_with_backoff`])
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a config that retries forever (infinite attempts)
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Short, bounded backoff for optimistic status writes.
    ///
    /// Conflicts clear as soon as the competing writer is done, so rounds are
    /// milliseconds apart rather than seconds.
    pub fn for_conflicts() -> Self {
        Self {
            max_attempts: DEFAULT_CONFLICT_ATTEMPTS,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Add jitter: 0.5x to 1.5x of the delay
fn jittered(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries indefinitely (or up to max_attempts if set) until success.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to retry
///
/// # Returns
/// The result of the operation, or the last error if max_attempts is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let jittered_delay = jittered(delay);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Result of a successful [`update_on_conflict`] round
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome<T> {
    /// The mutation changed the object and the write was accepted
    Updated(T),
    /// The mutation was a no-op against the latest object; nothing was written
    Unchanged(T),
}

impl<T> UpdateOutcome<T> {
    /// The object as it now stands in the store
    pub fn into_inner(self) -> T {
        match self {
            Self::Updated(t) | Self::Unchanged(t) => t,
        }
    }

    /// True when a write was issued
    pub fn was_written(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Optimistic read-modify-write with conflict retry.
///
/// Each round fetches the latest object, applies `mutate` to a copy, and
/// hands the copy to `write`, which must reject stale versions with
/// [`Error::Conflict`]. A conflict restarts the round from `fetch`. Any other
/// error from any step ends the loop and is returned unchanged. When the
/// mutation leaves the object equal to what was fetched, no write is issued.
///
/// The loop is bounded by `config.max_attempts`; a zero bound falls back to
/// [`DEFAULT_CONFLICT_ATTEMPTS`]. Exhaustion returns `Error::Conflict` with
/// the number of attempts made.
pub async fn update_on_conflict<T, Fetch, FetchFut, Mutate, Write, WriteFut>(
    config: &RetryConfig,
    operation_name: &str,
    mut fetch: Fetch,
    mut mutate: Mutate,
    mut write: Write,
) -> Result<UpdateOutcome<T>>
where
    T: Clone + PartialEq,
    Fetch: FnMut() -> FetchFut,
    FetchFut: Future<Output = Result<T>>,
    Mutate: FnMut(&mut T) -> Result<()>,
    Write: FnMut(T) -> WriteFut,
    WriteFut: Future<Output = Result<T>>,
{
    let max_attempts = if config.max_attempts == 0 {
        DEFAULT_CONFLICT_ATTEMPTS
    } else {
        config.max_attempts
    };
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let current = fetch().await?;
        let mut desired = current.clone();
        mutate(&mut desired)?;

        if desired == current {
            debug!(operation = %operation_name, attempt, "status already up to date");
            return Ok(UpdateOutcome::Unchanged(current));
        }

        match write(desired).await {
            Ok(written) => return Ok(UpdateOutcome::Updated(written)),
            Err(Error::Conflict { kind, name, .. }) => {
                metrics::record_status_conflict(operation_name);

                if attempt >= max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        kind = %kind,
                        name = %name,
                        "giving up on conflicting status write"
                    );
                    return Err(Error::Conflict {
                        kind,
                        name,
                        attempts: attempt,
                    });
                }

                let jittered_delay = jittered(delay);
                debug!(
                    operation = %operation_name,
                    attempt,
                    delay_ms = jittered_delay.as_millis(),
                    "status write conflicted, re-fetching"
                );
                tokio::time::sleep(jittered_delay).await;
                delay = config.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
