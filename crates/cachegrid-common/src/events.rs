//! Kubernetes Event recording for the cachegrid controller.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.
//!
//! Reason strings are shared with condition reasons
//! ([`crate::crd::reasons`]) so `kubectl get events` and
//! `kubectl describe` tell the same story.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about cachegrid objects
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`. Never fails; errors are logged.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops everything; used in tests
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Component health evaluation
    pub const HEALTH_CHECK: &str = "HealthCheck";
    /// Worker replica sync
    pub const SCALE: &str = "Scale";
    /// Dataset status projection
    pub const BIND: &str = "Bind";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::reasons;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::WORKERS_NOT_FOUND,
                actions::HEALTH_CHECK,
                Some("worker group missing".to_string()),
            )
            .await;
    }
}
