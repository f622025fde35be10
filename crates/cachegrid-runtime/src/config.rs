//! Controller configuration
//!
//! Knobs the operator binary materialises from its CLI/environment. The
//! reconcilers read them from the [`crate::Context`]; nothing here touches
//! the environment directly.

use std::time::Duration;

use cachegrid_common::retry::RetryConfig;

/// Requeue after a pass that found every component Ready
pub const DEFAULT_READY_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue after a pass that found a component NotReady
pub const DEFAULT_NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue after a pass that gave up on a contended status write
pub const DEFAULT_CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue after any other failed pass
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Runtime configuration of the cachegrid controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace to watch; None watches the whole cluster
    pub watch_namespace: Option<String>,
    /// Bound and backoff of the optimistic status-write loop
    pub status_retry: RetryConfig,
    /// Requeue interval when every component is Ready
    pub ready_requeue: Duration,
    /// Requeue interval when a component is not Ready yet
    pub not_ready_requeue: Duration,
    /// Requeue interval after exhausting status-write retries
    pub conflict_requeue: Duration,
    /// Requeue interval after any other error
    pub error_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            status_retry: RetryConfig::for_conflicts(),
            ready_requeue: DEFAULT_READY_REQUEUE,
            not_ready_requeue: DEFAULT_NOT_READY_REQUEUE,
            conflict_requeue: DEFAULT_CONFLICT_REQUEUE,
            error_requeue: DEFAULT_ERROR_REQUEUE,
        }
    }
}

impl ControllerConfig {
    /// Override the number of attempts of each status write
    pub fn with_status_retry_attempts(mut self, attempts: u32) -> Self {
        self.status_retry.max_attempts = attempts;
        self
    }

    /// Requeue interval for a pass that completed without error
    pub fn requeue_after(&self, all_ready: bool) -> Duration {
        if all_ready {
            self.ready_requeue
        } else {
            self.not_ready_requeue
        }
    }

    /// Fast settings for tests: millisecond backoff
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            status_retry: RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = ControllerConfig::default();
        assert!(config.status_retry.max_attempts > 0);
        assert!(config.not_ready_requeue < config.ready_requeue);
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn requeue_depends_on_readiness() {
        let config = ControllerConfig::default();
        assert_eq!(config.requeue_after(true), DEFAULT_READY_REQUEUE);
        assert_eq!(config.requeue_after(false), DEFAULT_NOT_READY_REQUEUE);
    }

    #[test]
    fn retry_attempts_override() {
        let config = ControllerConfig::default().with_status_retry_attempts(9);
        assert_eq!(config.status_retry.max_attempts, 9);
    }
}
