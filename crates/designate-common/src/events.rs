//! Kubernetes Event recording for the Designate controllers.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so reconcilers can
//! emit Events visible via `kubectl describe` while tests stay offline.
//!
//! Publishing is fire-and-forget: failures are logged and never returned.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about a resource.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`.
    ///
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason, see [`reasons`]
    /// * `action` - What the controller was doing, see [`actions`]
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production publisher backed by a `Recorder`.
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
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every Event.
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

/// Event reasons (REASON column of `kubectl get events`).
pub mod reasons {
    /// Finalizer added, reconciliation begins
    pub const INITIALIZED: &str = "Initialized";
    /// A dependency moved the entity out of Ready
    pub const DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
    /// Topology binding changed
    pub const TOPOLOGY_BOUND: &str = "TopologyBound";
    /// Topology binding released
    pub const TOPOLOGY_RELEASED: &str = "TopologyReleased";
    /// Every condition is True
    pub const READY: &str = "Ready";
    /// A pass failed against the API server
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// Finalizers released, entity may be removed
    pub const DELETED: &str = "Deleted";
}

/// Event actions (ACTION column of `kubectl get events`).
pub mod actions {
    /// Standard reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Deletion cleanup
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::DEPENDENCY_NOT_READY,
                actions::RECONCILE,
                Some("TransportURL designate-transport not ready".to_string()),
            )
            .await;
    }
}
