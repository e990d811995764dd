//! Common types for the Designate operator: CRDs, conditions, errors and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::{Error, ErrorClass};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply and patch
pub const FIELD_MANAGER: &str = "designate-operator";

/// Label key naming the owning service
pub const LABEL_SERVICE: &str = "service";

/// Label key naming the owning component
pub const LABEL_COMPONENT: &str = "component";

/// Label key for the managing controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Annotation carrying the Multus network attachment list
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Annotation carrying the rendered config hash on pod templates
pub const CONFIG_HASH_ANNOTATION: &str = "designate.openstack.org/config-hash";

/// Label selecting the default Topology for unqualified references
pub const DEFAULT_TOPOLOGY_LABEL: &str = "topology.openstack.org/default";
