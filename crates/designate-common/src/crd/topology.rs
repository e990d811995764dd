//! Topology CRD and references to it
//!
//! A Topology is a shared placement definition: spread constraints and
//! affinity rules that any number of service workloads may bind to. Each
//! bound workload owner leaves its finalizer on the Topology so that it is
//! not deleted while still referenced.

use k8s_openapi::api::core::v1::{Affinity, TopologySpreadConstraint};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Placement definition shared by service workloads.
///
/// Example:
/// ```yaml
/// apiVersion: topology.openstack.org/v1beta1
/// kind: Topology
/// metadata:
///   name: spread-zones
///   labels:
///     topology.openstack.org/default: "true"
/// spec:
///   topologySpreadConstraints:
///     - maxSkew: 1
///       topologyKey: topology.kubernetes.io/zone
///       whenUnsatisfiable: DoNotSchedule
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "topology.openstack.org",
    version = "v1beta1",
    kind = "Topology",
    plural = "topologies",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    /// Spread constraints applied to the pod template of bound workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,

    /// Affinity applied to the pod template of bound workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

/// Pointer to a Topology.
///
/// An empty `name` makes the reference unqualified: it is resolved through
/// the controller's default label selector instead of by name. A missing
/// `namespace` means the namespace of the referencing entity.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TopologyRef {
    /// Name of the Topology
    #[serde(default)]
    pub name: String,

    /// Namespace of the Topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TopologyRef {
    /// Reference a Topology by name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Whether the reference names a specific Topology
    pub fn is_qualified(&self) -> bool {
        !self.name.is_empty()
    }

    /// Namespace of the reference, falling back to the owner's namespace
    pub fn resolve_namespace<'a>(&'a self, owner_namespace: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(owner_namespace)
    }
}

impl std::fmt::Display for TopologyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Topology {
    /// Fully qualified reference to this Topology
    pub fn reference(&self) -> TopologyRef {
        TopologyRef {
            name: self.metadata.name.clone().unwrap_or_default(),
            namespace: self.metadata.namespace.clone(),
        }
    }

    /// Whether the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == finalizer))
    }
}

/// Access to the placement fields of an entity that binds to a Topology
pub trait TopologyHandler {
    /// The Topology requested in the entity's spec
    fn spec_topology_ref(&self) -> Option<&TopologyRef>;

    /// The Topology bound by the last successful pass
    fn last_applied_topology(&self) -> Option<&TopologyRef>;

    /// Record the Topology bound by this pass
    fn set_last_applied_topology(&mut self, topology: Option<TopologyRef>);
}
