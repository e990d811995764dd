//! Readiness conditions and their aggregation
//!
//! Every dependency step of a reconcile pass records one [`Condition`] in the
//! entity's [`ConditionSet`]. The set reduces to a single `Ready` condition by
//! walking [`ConditionType::PRIORITY`] and reporting the first condition that
//! is not `True`, so users always see the most fundamental blocker.

use chrono::{DateTime, SubsecRound, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Well-known condition kinds.
///
/// Variant order is the aggregation priority (after `Ready`), and the order
/// conditions are stored in status.
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum ConditionType {
    /// Aggregate of every other condition
    Ready,
    /// Input secrets exist and carry the required keys
    InputReady,
    /// The workload's ServiceAccount exists
    ServiceAccountReady,
    /// The referenced messaging TransportURL is ready
    #[serde(rename = "TransportURLReady")]
    TransportUrlReady,
    /// The database account and its credentials are ready
    #[serde(rename = "DBReady")]
    DbReady,
    /// Every requested network attachment definition exists
    NetworkAttachmentsReady,
    /// The placement topology resolved and is bound
    TopologyReady,
    /// Service configuration rendered successfully
    ServiceConfigReady,
    /// Workload replicas are ready
    DeploymentReady,
}

impl ConditionType {
    /// Aggregation order, most fundamental dependency first
    pub const PRIORITY: [ConditionType; 8] = [
        ConditionType::InputReady,
        ConditionType::ServiceAccountReady,
        ConditionType::TransportUrlReady,
        ConditionType::DbReady,
        ConditionType::NetworkAttachmentsReady,
        ConditionType::TopologyReady,
        ConditionType::ServiceConfigReady,
        ConditionType::DeploymentReady,
    ];

    /// Wire name of the condition type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::InputReady => "InputReady",
            Self::ServiceAccountReady => "ServiceAccountReady",
            Self::TransportUrlReady => "TransportURLReady",
            Self::DbReady => "DBReady",
            Self::NetworkAttachmentsReady => "NetworkAttachmentsReady",
            Self::TopologyReady => "TopologyReady",
            Self::ServiceConfigReady => "ServiceConfigReady",
            Self::DeploymentReady => "DeploymentReady",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How serious a non-True condition is
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Severity {
    /// Expected to resolve without intervention
    Info,
    /// Likely needs a spec or environment fix
    Warning,
    /// A backend operation failed
    Error,
}

/// Machine-readable reasons recorded on conditions
pub mod reasons {
    /// Condition is satisfied
    pub const READY: &str = "Ready";
    /// Condition has not been evaluated yet
    pub const INIT: &str = "Init";
    /// Input secret missing or incomplete
    pub const INPUT_NOT_READY: &str = "InputNotReady";
    /// Input secret could not be read
    pub const INPUT_ERROR: &str = "InputError";
    /// ServiceAccount could not be ensured
    pub const SERVICE_ACCOUNT_ERROR: &str = "ServiceAccountError";
    /// TransportURL exists but is not ready
    pub const TRANSPORT_NOT_READY: &str = "TransportURLNotReady";
    /// TransportURL does not exist
    pub const TRANSPORT_NOT_FOUND: &str = "TransportURLNotFound";
    /// TransportURL could not be read
    pub const TRANSPORT_ERROR: &str = "TransportURLError";
    /// Database account or credentials not ready
    pub const DATABASE_NOT_READY: &str = "DatabaseNotReady";
    /// Database account does not exist
    pub const DATABASE_NOT_FOUND: &str = "DatabaseNotFound";
    /// Database account could not be read
    pub const DATABASE_ERROR: &str = "DatabaseError";
    /// One or more network attachment definitions are missing
    pub const NETWORK_ATTACHMENTS_NOT_FOUND: &str = "NetworkAttachmentsNotFound";
    /// Network attachment definitions could not be read
    pub const NETWORK_ATTACHMENTS_ERROR: &str = "NetworkAttachmentsError";
    /// Topology reference resolved to nothing
    pub const TOPOLOGY_NOT_FOUND: &str = "TopologyNotFound";
    /// Topology reference resolved to several candidates
    pub const TOPOLOGY_AMBIGUOUS: &str = "TopologyAmbiguous";
    /// Topology lookup or finalizer bookkeeping failed
    pub const TOPOLOGY_ERROR: &str = "TopologyError";
    /// Service configuration could not be rendered
    pub const SERVICE_CONFIG_ERROR: &str = "ServiceConfigError";
    /// Workload applied but replicas not ready yet
    pub const DEPLOYMENT_IN_PROGRESS: &str = "DeploymentInProgress";
    /// Workload could not be applied or read
    pub const DEPLOYMENT_ERROR: &str = "DeploymentError";
    /// Step did not finish before the pass deadline
    pub const TIMEOUT: &str = "Timeout";
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity of a non-True condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition's status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        severity: Option<Severity>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            severity,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now().trunc_subsecs(0),
        }
    }

    /// A satisfied condition
    pub fn ready(type_: ConditionType, message: impl Into<String>) -> Self {
        Self::new(
            type_,
            ConditionStatus::True,
            None,
            reasons::READY,
            message,
        )
    }

    /// An unsatisfied condition
    pub fn not_ready(
        type_: ConditionType,
        reason: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            type_,
            ConditionStatus::False,
            Some(severity),
            reason,
            message,
        )
    }

    /// Whether the condition is satisfied
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Equality ignoring the transition timestamp
    fn same_observation(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Capability to record conditions on an entity
pub trait ConditionUpdater {
    /// Insert or overwrite the condition of the same type
    fn set(&mut self, condition: Condition);

    /// Drop a condition that no longer applies
    fn remove_condition(&mut self, type_: ConditionType);

    /// Record `type_` as satisfied with the given message
    fn mark_true(&mut self, type_: ConditionType, message: &str) {
        self.set(Condition::ready(type_, message));
    }
}

/// Conditions of one entity, unique per type.
///
/// Serialized as a list ordered by [`ConditionType`] so that identical sets
/// always produce identical status documents.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a condition by type
    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition exists and is True
    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    /// Remove a condition that no longer applies
    pub fn remove(&mut self, type_: ConditionType) -> Option<Condition> {
        let idx = self.0.iter().position(|c| c.type_ == type_)?;
        Some(self.0.remove(idx))
    }

    /// Record an unsatisfied condition
    pub fn mark_false(
        &mut self,
        type_: ConditionType,
        reason: &str,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.set(Condition::not_ready(type_, reason, severity, message));
    }

    /// Iterate conditions in stored order
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// Number of recorded conditions
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no condition has been recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reduce the set to one `Ready` condition.
    ///
    /// The first condition in priority order that is not True decides the
    /// result. Conditions that are absent are skipped; an empty set is
    /// `Unknown`.
    pub fn aggregate(&self) -> Condition {
        let mut seen = false;
        for type_ in ConditionType::PRIORITY {
            let Some(cond) = self.get(type_) else {
                continue;
            };
            seen = true;
            if !cond.is_true() {
                return Condition::new(
                    ConditionType::Ready,
                    if cond.status == ConditionStatus::Unknown {
                        ConditionStatus::Unknown
                    } else {
                        ConditionStatus::False
                    },
                    cond.severity,
                    cond.reason.clone(),
                    cond.message.clone(),
                );
            }
        }

        if seen {
            Condition::ready(ConditionType::Ready, "Setup complete")
        } else {
            Condition::new(
                ConditionType::Ready,
                ConditionStatus::Unknown,
                None,
                reasons::INIT,
                "Reconciliation has not started",
            )
        }
    }

    /// Recompute and store the aggregate `Ready` condition
    pub fn set_ready(&mut self) {
        let ready = self.aggregate();
        self.set(ready);
    }
}

impl ConditionUpdater for ConditionSet {
    fn set(&mut self, mut condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.same_observation(&condition) {
                    return;
                }
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => {
                let idx = self
                    .0
                    .iter()
                    .position(|c| c.type_ > condition.type_)
                    .unwrap_or(self.0.len());
                self.0.insert(idx, condition);
            }
        }
    }

    fn remove_condition(&mut self, type_: ConditionType) {
        self.remove(type_);
    }
}
