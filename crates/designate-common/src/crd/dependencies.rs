//! Resources owned by other operators that a DesignateProducer depends on
//!
//! Only the fields the reconciler reads are modelled. Readiness of the
//! operator-managed resources is reported through a `Ready` entry in their
//! `status.conditions`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::ConditionStatus;

/// Condition as published by other operators.
///
/// The condition type is kept as a string because foreign operators publish
/// types this controller does not know about.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    #[serde(default)]
    pub status: ConditionStatus,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Whether `conditions` contains a True `Ready` entry
pub fn is_ready(conditions: &[ResourceCondition]) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == ConditionStatus::True)
}

/// Message of the `Ready` entry, if any
pub fn ready_message(conditions: &[ResourceCondition]) -> Option<&str> {
    conditions
        .iter()
        .find(|c| c.type_ == "Ready")
        .and_then(|c| c.message.as_deref())
}

/// Messaging endpoint credentials produced by the RabbitMQ operator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.openstack.org",
    version = "v1beta1",
    kind = "TransportURL",
    namespaced,
    status = "TransportURLStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TransportURLSpec {
    /// RabbitMQ cluster the URL points at
    #[serde(default)]
    pub rabbitmq_cluster_name: String,
}

/// TransportURL status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportURLStatus {
    /// Secret holding the `transport_url` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Conditions reported by the RabbitMQ operator
    #[serde(default)]
    pub conditions: Vec<ResourceCondition>,
}

impl TransportURL {
    /// Whether the TransportURL reports Ready and names its secret
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_ready(&s.conditions) && s.secret_name.is_some())
    }

    /// Name of the secret holding the URL, once published
    pub fn secret_name(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.secret_name.as_deref())
    }
}

/// Database account managed by the MariaDB operator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "mariadb.openstack.org",
    version = "v1beta1",
    kind = "MariaDBAccount",
    namespaced,
    status = "MariaDBAccountStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBAccountSpec {
    /// Database user name
    #[serde(default)]
    pub user_name: String,

    /// Secret holding the account password
    #[serde(default)]
    pub secret: String,
}

/// MariaDBAccount status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBAccountStatus {
    /// Conditions reported by the MariaDB operator
    #[serde(default)]
    pub conditions: Vec<ResourceCondition>,
}

impl MariaDBAccount {
    /// Whether the account reports Ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| is_ready(&s.conditions))
    }
}

/// Key in the account secret holding the password
pub const DATABASE_PASSWORD_SELECTOR: &str = "DatabasePassword";

/// Multus secondary network definition
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI configuration JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_url_ready_requires_secret() {
        let yaml = r#"
apiVersion: rabbitmq.openstack.org/v1beta1
kind: TransportURL
metadata:
  name: designate-transport
  namespace: openstack
spec:
  rabbitmqClusterName: rabbitmq
status:
  conditions:
    - type: Ready
      status: "True"
    - type: TransportURLReady
      status: "True"
"#;
        let mut transport: TransportURL = serde_yaml::from_str(yaml).expect("parse");
        assert!(!transport.is_ready());

        if let Some(status) = transport.status.as_mut() {
            status.secret_name = Some("rabbitmq-transport-url-designate".to_string());
        }
        assert!(transport.is_ready());
        assert_eq!(
            transport.secret_name(),
            Some("rabbitmq-transport-url-designate")
        );
    }

    #[test]
    fn mariadb_account_readiness() {
        let yaml = r#"
apiVersion: mariadb.openstack.org/v1beta1
kind: MariaDBAccount
metadata:
  name: designate
spec:
  userName: designate
  secret: designate-db-secret
status:
  conditions:
    - type: Ready
      status: "False"
      message: waiting for database
"#;
        let account: MariaDBAccount = serde_yaml::from_str(yaml).expect("parse");
        assert!(!account.is_ready());
        let conditions = &account.status.as_ref().unwrap().conditions;
        assert_eq!(ready_message(conditions), Some("waiting for database"));
    }

    #[test]
    fn missing_status_is_not_ready() {
        let account = MariaDBAccount::new("designate", MariaDBAccountSpec::default());
        assert!(!account.is_ready());
        let transport = TransportURL::new("t", TransportURLSpec::default());
        assert!(!transport.is_ready());
    }
}
