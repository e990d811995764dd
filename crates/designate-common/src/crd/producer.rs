//! DesignateProducer CRD
//!
//! A DesignateProducer is one deployable unit of the DNS-management service.
//! Its reconciler waits on secrets, messaging, database and network
//! prerequisites, binds a placement Topology, renders configuration and runs
//! the workload, publishing progress as conditions in status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{Condition, ConditionSet, ConditionType, ConditionUpdater};
use super::topology::{TopologyHandler, TopologyRef};

/// Finalizer the controller places on DesignateProducer resources
pub const PRODUCER_FINALIZER: &str = "openstack.org/designateproducer";

/// Default container image for the producer workload
pub const DEFAULT_PRODUCER_IMAGE: &str =
    "quay.io/podified-antelope-centos9/openstack-designate-producer:current-podified";

/// Desired state of a Designate producer service.
///
/// Example:
/// ```yaml
/// apiVersion: designate.openstack.org/v1beta1
/// kind: DesignateProducer
/// metadata:
///   name: designate-producer
///   namespace: openstack
/// spec:
///   databaseHostname: openstack.openstack.svc
///   transportURL: designate-transport
///   networkAttachments: [designate]
///   topologyRef:
///     name: spread-zones
///   customServiceConfig: |
///     [DEFAULT]
///     debug=True
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "designate.openstack.org",
    version = "v1beta1",
    kind = "DesignateProducer",
    namespaced,
    status = "DesignateProducerStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DesignateProducerSpec {
    /// Container image for the producer
    #[serde(default = "default_image")]
    pub container_image: String,

    /// Desired number of replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Keystone service user
    #[serde(default = "default_service_user")]
    pub service_user: String,

    /// Name of the MariaDBAccount used for database access
    #[serde(default = "default_database_account")]
    pub database_account: String,

    /// Database host the service connects to
    #[serde(default)]
    pub database_hostname: String,

    /// Secret holding service passwords
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Keys to read from `secret`
    #[serde(default)]
    pub password_selectors: PasswordSelector,

    /// TransportURL providing messaging credentials
    #[serde(
        default,
        rename = "transportURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub transport_url: Option<String>,

    /// NetworkAttachmentDefinitions the pods attach to
    #[serde(default)]
    pub network_attachments: Vec<String>,

    /// Placement Topology for the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_ref: Option<TopologyRef>,

    /// Extra configuration appended to the service config as custom.conf
    #[serde(default)]
    pub custom_service_config: String,
}

/// Keys selecting passwords out of the service secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSelector {
    /// Key holding the service user password
    #[serde(default = "default_service_selector")]
    pub service: String,
}

impl Default for PasswordSelector {
    fn default() -> Self {
        Self {
            service: default_service_selector(),
        }
    }
}

impl Default for DesignateProducerSpec {
    fn default() -> Self {
        Self {
            container_image: default_image(),
            replicas: default_replicas(),
            service_user: default_service_user(),
            database_account: default_database_account(),
            database_hostname: String::new(),
            secret: default_secret(),
            password_selectors: PasswordSelector::default(),
            transport_url: None,
            network_attachments: Vec::new(),
            topology_ref: None,
            custom_service_config: String::new(),
        }
    }
}

fn default_image() -> String {
    DEFAULT_PRODUCER_IMAGE.to_string()
}

fn default_replicas() -> i32 {
    1
}

fn default_service_user() -> String {
    "designate".to_string()
}

fn default_database_account() -> String {
    "designate".to_string()
}

fn default_secret() -> String {
    "osp-secret".to_string()
}

fn default_service_selector() -> String {
    "DesignatePassword".to_string()
}

/// Lifecycle phase derived from the aggregated conditions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ProducerPhase {
    /// Some dependency is unmet
    #[default]
    Pending,
    /// Every dependency is met and configuration rendered
    ConfigReady,
    /// Workload applied, replicas converging
    Deploying,
    /// Ready replicas match the desired count
    Ready,
}

impl std::fmt::Display for ProducerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::ConfigReady => write!(f, "ConfigReady"),
            Self::Deploying => write!(f, "Deploying"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Observed state of a DesignateProducer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DesignateProducerStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ProducerPhase,

    /// Number of ready workload replicas
    #[serde(default)]
    pub ready_count: i32,

    /// Readiness conditions
    #[serde(default)]
    pub conditions: ConditionSet,

    /// Topology bound by the last successful pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_topology: Option<TopologyRef>,

    /// Hashes of rendered inputs, keyed by input name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hash: BTreeMap<String, String>,

    /// Generation the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl DesignateProducer {
    /// Mutable status, created empty on first access
    pub fn status_mut(&mut self) -> &mut DesignateProducerStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Conditions recorded so far (empty when no status exists)
    pub fn conditions(&self) -> Option<&ConditionSet> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    /// Whether the controller finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == PRODUCER_FINALIZER))
    }

    /// Whether the resource is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Finalizer this producer places on the Topology it binds
    ///
    /// Carries namespace and name so that it is unique in the cluster and a
    /// Topology can be mapped back to the producers it places.
    pub fn topology_finalizer(&self) -> String {
        format!(
            "{}-{}.{}",
            PRODUCER_FINALIZER,
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }
}

/// Namespace and name of the producer owning a Topology finalizer.
///
/// Namespaces cannot contain dots, so the first dot separates the two.
pub fn producer_for_topology_finalizer(finalizer: &str) -> Option<(&str, &str)> {
    finalizer
        .strip_prefix(PRODUCER_FINALIZER)?
        .strip_prefix('-')?
        .split_once('.')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}

impl ConditionUpdater for DesignateProducer {
    fn set(&mut self, condition: Condition) {
        self.status_mut().conditions.set(condition);
    }

    fn remove_condition(&mut self, type_: ConditionType) {
        if let Some(status) = self.status.as_mut() {
            status.conditions.remove(type_);
        }
    }
}

impl TopologyHandler for DesignateProducer {
    fn spec_topology_ref(&self) -> Option<&TopologyRef> {
        self.spec.topology_ref.as_ref()
    }

    fn last_applied_topology(&self) -> Option<&TopologyRef> {
        self.status
            .as_ref()
            .and_then(|s| s.last_applied_topology.as_ref())
    }

    fn set_last_applied_topology(&mut self, topology: Option<TopologyRef>) {
        self.status_mut().last_applied_topology = topology;
    }
}
