//! Dependency resolvers
//!
//! Each resolver reads one kind of prerequisite and reports a
//! [`DependencyOutcome`]. Resolvers never write to the cluster; the reconciler
//! turns the outcome into a condition and a requeue decision.

use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use designate_common::crd::{
    ready_message, reasons, Condition, ConditionType, DesignateProducer, Severity,
    DATABASE_PASSWORD_SELECTOR,
};
use designate_common::{Error, ErrorClass};

use crate::client::ProducerKubeClient;

/// Result of checking one dependency.
#[derive(Debug)]
pub enum DependencyOutcome {
    /// The dependency is satisfied
    Satisfied {
        /// Message recorded on the True condition
        message: String,
    },
    /// The dependency exists or is expected to appear, but is not ready
    Unready {
        /// Condition reason
        reason: &'static str,
        /// Condition severity (Info or Warning)
        severity: Severity,
        /// Human-readable detail
        message: String,
    },
    /// The reference points at something that does not exist
    Misconfigured {
        /// Condition reason
        reason: &'static str,
        /// Human-readable detail
        message: String,
    },
    /// Reading the dependency failed
    Failed {
        /// Condition reason
        reason: &'static str,
        /// The underlying error
        error: Error,
    },
}

impl DependencyOutcome {
    /// Whether later steps may run
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// Whether another pass may succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed { error, .. } => error.is_retryable(),
            _ => true,
        }
    }

    /// The error behind a failed read
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// How an unsatisfied outcome is scheduled for retry
    ///
    /// A read the API server refused outright (a 4xx such as Forbidden) will
    /// not succeed on a quick retry, so it waits out the misconfiguration
    /// delay instead of the transient backoff.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Satisfied { .. } => None,
            Self::Unready { .. } => Some(ErrorClass::Unready),
            Self::Misconfigured { .. } => Some(ErrorClass::Misconfiguration),
            Self::Failed { error, .. } => Some(match error {
                Error::Timeout { .. } => ErrorClass::Transient,
                _ if !self.is_retryable() => ErrorClass::Misconfiguration,
                e => e.class(),
            }),
        }
    }

    /// Condition recording this outcome under `type_`
    pub fn to_condition(&self, type_: ConditionType) -> Condition {
        match self {
            Self::Satisfied { message } => Condition::ready(type_, message.clone()),
            Self::Unready {
                reason,
                severity,
                message,
            } => Condition::not_ready(type_, *reason, *severity, message.clone()),
            Self::Misconfigured { reason, message } => {
                Condition::not_ready(type_, *reason, Severity::Warning, message.clone())
            }
            Self::Failed {
                error: error @ Error::Timeout { .. },
                ..
            } => Condition::not_ready(
                type_,
                reasons::TIMEOUT,
                Severity::Warning,
                error.to_string(),
            ),
            Self::Failed { reason, error } => {
                Condition::not_ready(type_, *reason, Severity::Error, error.to_string())
            }
        }
    }
}

fn satisfied(message: impl Into<String>) -> DependencyOutcome {
    DependencyOutcome::Satisfied {
        message: message.into(),
    }
}

/// Keys from `keys` that are absent in `secret`
pub(crate) fn missing_keys<'a>(secret: &Secret, keys: &[&'a str]) -> Vec<&'a str> {
    keys.iter()
        .copied()
        .filter(|key| {
            let in_data = secret.data.as_ref().is_some_and(|d| d.contains_key(*key));
            let in_string_data = secret
                .string_data
                .as_ref()
                .is_some_and(|d| d.contains_key(*key));
            !in_data && !in_string_data
        })
        .collect()
}

/// Input secret: exists and carries the service password key.
pub async fn resolve_input(
    kube: &dyn ProducerKubeClient,
    producer: &DesignateProducer,
    namespace: &str,
) -> DependencyOutcome {
    let name = &producer.spec.secret;
    let secret = match kube.get_secret(name, namespace).await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            debug!(secret = %name, "input secret not found");
            return DependencyOutcome::Unready {
                reason: reasons::INPUT_NOT_READY,
                severity: Severity::Warning,
                message: format!("Input data resources missing: secret/{}", name),
            };
        }
        Err(error) => {
            return DependencyOutcome::Failed {
                reason: reasons::INPUT_ERROR,
                error,
            }
        }
    };

    let missing = missing_keys(&secret, &[producer.spec.password_selectors.service.as_str()]);
    if !missing.is_empty() {
        return DependencyOutcome::Unready {
            reason: reasons::INPUT_NOT_READY,
            severity: Severity::Warning,
            message: format!(
                "Input data error occurred: secret/{} missing keys {}",
                name,
                missing.join(",")
            ),
        };
    }

    satisfied("Input data complete")
}

/// Messaging endpoint: the referenced TransportURL reports Ready.
///
/// Returns None when no TransportURL is referenced; the condition does not
/// apply in that case.
pub async fn resolve_transport(
    kube: &dyn ProducerKubeClient,
    producer: &DesignateProducer,
    namespace: &str,
) -> Option<DependencyOutcome> {
    let name = producer.spec.transport_url.as_deref()?;
    let outcome = match kube.get_transport_url(name, namespace).await {
        Ok(None) => DependencyOutcome::Misconfigured {
            reason: reasons::TRANSPORT_NOT_FOUND,
            message: format!("TransportURL {} not found", name),
        },
        Ok(Some(transport)) if !transport.is_ready() => DependencyOutcome::Unready {
            reason: reasons::TRANSPORT_NOT_READY,
            severity: Severity::Info,
            message: transport
                .status
                .as_ref()
                .and_then(|s| ready_message(&s.conditions))
                .map(|m| format!("TransportURL {} not ready: {}", name, m))
                .unwrap_or_else(|| format!("TransportURL {} not ready", name)),
        },
        Ok(Some(_)) => satisfied("TransportURL successfully created"),
        Err(error) => DependencyOutcome::Failed {
            reason: reasons::TRANSPORT_ERROR,
            error,
        },
    };
    Some(outcome)
}

/// Database: the MariaDBAccount is Ready and its credential secret holds the
/// password.
pub async fn resolve_database(
    kube: &dyn ProducerKubeClient,
    producer: &DesignateProducer,
    namespace: &str,
) -> DependencyOutcome {
    let name = &producer.spec.database_account;
    let account = match kube.get_mariadb_account(name, namespace).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            return DependencyOutcome::Misconfigured {
                reason: reasons::DATABASE_NOT_FOUND,
                message: format!("MariaDBAccount {} not found", name),
            }
        }
        Err(error) => {
            return DependencyOutcome::Failed {
                reason: reasons::DATABASE_ERROR,
                error,
            }
        }
    };

    if !account.is_ready() {
        return DependencyOutcome::Unready {
            reason: reasons::DATABASE_NOT_READY,
            severity: Severity::Info,
            message: format!("MariaDBAccount {} not ready", name),
        };
    }

    let secret_name = &account.spec.secret;
    if secret_name.is_empty() {
        return DependencyOutcome::Unready {
            reason: reasons::DATABASE_NOT_READY,
            severity: Severity::Info,
            message: format!("MariaDBAccount {} has no credential secret yet", name),
        };
    }
    match kube.get_secret(secret_name, namespace).await {
        Ok(Some(secret)) if missing_keys(&secret, &[DATABASE_PASSWORD_SELECTOR]).is_empty() => {
            satisfied("DB create completed")
        }
        Ok(Some(_)) => DependencyOutcome::Unready {
            reason: reasons::DATABASE_NOT_READY,
            severity: Severity::Info,
            message: format!(
                "secret/{} missing key {}",
                secret_name, DATABASE_PASSWORD_SELECTOR
            ),
        },
        Ok(None) => DependencyOutcome::Unready {
            reason: reasons::DATABASE_NOT_READY,
            severity: Severity::Info,
            message: format!("credential secret/{} not found", secret_name),
        },
        Err(error) => DependencyOutcome::Failed {
            reason: reasons::DATABASE_ERROR,
            error,
        },
    }
}

/// Network attachments: every named definition exists.
pub async fn resolve_network_attachments(
    kube: &dyn ProducerKubeClient,
    producer: &DesignateProducer,
    namespace: &str,
) -> DependencyOutcome {
    let mut missing = Vec::new();
    for name in &producer.spec.network_attachments {
        match kube.get_network_attachment(name, namespace).await {
            Ok(Some(_)) => {}
            Ok(None) => missing.push(name.as_str()),
            Err(error) => {
                return DependencyOutcome::Failed {
                    reason: reasons::NETWORK_ATTACHMENTS_ERROR,
                    error,
                }
            }
        }
    }

    if missing.is_empty() {
        satisfied("NetworkAttachments completed")
    } else {
        DependencyOutcome::Misconfigured {
            reason: reasons::NETWORK_ATTACHMENTS_NOT_FOUND,
            message: format!("network-attachment-definition {} not found", missing.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockProducerKubeClient;
    use designate_common::crd::{
        ConditionStatus, DesignateProducerSpec, MariaDBAccount, MariaDBAccountSpec,
        MariaDBAccountStatus, NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec,
        ResourceCondition, TransportURL, TransportURLSpec, TransportURLStatus,
    };
    use k8s_openapi::ByteString;
    use kube::core::ErrorResponse;
    use std::collections::BTreeMap;

    fn producer() -> DesignateProducer {
        let mut producer = DesignateProducer::new("designate-producer", DesignateProducerSpec::default());
        producer.metadata.namespace = Some("openstack".to_string());
        producer
    }

    fn secret(keys: &[&str]) -> Secret {
        Secret {
            data: Some(
                keys.iter()
                    .map(|k| (k.to_string(), ByteString(b"12345678".to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn ready_conditions() -> Vec<ResourceCondition> {
        vec![ResourceCondition {
            type_: "Ready".to_string(),
            status: ConditionStatus::True,
            ..Default::default()
        }]
    }

    fn server_error() -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "etcd unavailable".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        }))
    }

    #[tokio::test]
    async fn input_missing_secret_is_unready() {
        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_secret().returning(|_, _| Ok(None));

        let outcome = resolve_input(&mock, &producer(), "openstack").await;
        assert_eq!(outcome.class(), Some(ErrorClass::Unready));
        let cond = outcome.to_condition(ConditionType::InputReady);
        assert_eq!(cond.reason, reasons::INPUT_NOT_READY);
        assert!(cond.message.contains("osp-secret"));
    }

    #[tokio::test]
    async fn input_requires_password_key() {
        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_secret()
            .returning(|_, _| Ok(Some(secret(&["SomethingElse"]))));

        let outcome = resolve_input(&mock, &producer(), "openstack").await;
        assert!(!outcome.is_satisfied());
        let cond = outcome.to_condition(ConditionType::InputReady);
        assert!(cond.message.contains("DesignatePassword"));

        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_secret()
            .returning(|_, _| Ok(Some(secret(&["DesignatePassword"]))));
        assert!(resolve_input(&mock, &producer(), "openstack")
            .await
            .is_satisfied());
    }

    /// Story: a failing read surfaces as an Error-severity condition with the cause
    #[tokio::test]
    async fn story_backend_failure_wraps_cause() {
        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_secret().returning(|_, _| Err(server_error()));

        let outcome = resolve_input(&mock, &producer(), "openstack").await;
        assert_eq!(outcome.class(), Some(ErrorClass::Transient));
        assert!(outcome.is_retryable());
        assert!(outcome.error().is_some());
        let cond = outcome.to_condition(ConditionType::InputReady);
        assert_eq!(cond.severity, Some(Severity::Error));
        assert_eq!(cond.reason, reasons::INPUT_ERROR);
        assert!(cond.message.contains("etcd unavailable"));
    }

    /// Story: a refused read is still an Error condition but is not hot-retried
    #[tokio::test]
    async fn story_forbidden_read_waits_for_a_fix() {
        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_secret().returning(|_, _| {
            Err(Error::from(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "secrets is forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            })))
        });

        let outcome = resolve_input(&mock, &producer(), "openstack").await;
        assert!(!outcome.is_retryable());
        assert!(outcome.error().is_some());
        assert_eq!(outcome.class(), Some(ErrorClass::Misconfiguration));
        let cond = outcome.to_condition(ConditionType::InputReady);
        assert_eq!(cond.severity, Some(Severity::Error));
        assert_eq!(cond.reason, reasons::INPUT_ERROR);
    }

    #[tokio::test]
    async fn transport_not_applicable_without_reference() {
        let mock = MockProducerKubeClient::new();
        assert!(resolve_transport(&mock, &producer(), "openstack")
            .await
            .is_none());
    }

    /// Story: missing, initializing and ready TransportURLs are distinct outcomes
    #[tokio::test]
    async fn story_transport_three_states() {
        let mut p = producer();
        p.spec.transport_url = Some("designate-transport".to_string());

        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_transport_url().returning(|_, _| Ok(None));
        let outcome = resolve_transport(&mock, &p, "openstack").await.unwrap();
        assert_eq!(outcome.class(), Some(ErrorClass::Misconfiguration));

        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_transport_url().returning(|name, _| {
            Ok(Some(TransportURL::new(name, TransportURLSpec::default())))
        });
        let outcome = resolve_transport(&mock, &p, "openstack").await.unwrap();
        assert_eq!(outcome.class(), Some(ErrorClass::Unready));

        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_transport_url().returning(|name, _| {
            let mut t = TransportURL::new(name, TransportURLSpec::default());
            t.status = Some(TransportURLStatus {
                secret_name: Some("rabbitmq-transport-url-designate".to_string()),
                conditions: ready_conditions(),
            });
            Ok(Some(t))
        });
        let outcome = resolve_transport(&mock, &p, "openstack").await.unwrap();
        assert!(outcome.is_satisfied());
    }

    fn ready_account(name: &str) -> MariaDBAccount {
        let mut account = MariaDBAccount::new(
            name,
            MariaDBAccountSpec {
                user_name: "designate".to_string(),
                secret: "designate-db-secret".to_string(),
            },
        );
        account.status = Some(MariaDBAccountStatus {
            conditions: ready_conditions(),
        });
        account
    }

    /// Story: database readiness needs both the account and its credentials
    #[tokio::test]
    async fn story_database_is_two_phase() {
        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_mariadb_account()
            .returning(|name, _| Ok(Some(ready_account(name))));
        mock.expect_get_secret().returning(|_, _| Ok(None));
        let outcome = resolve_database(&mock, &producer(), "openstack").await;
        assert_eq!(outcome.class(), Some(ErrorClass::Unready));

        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_mariadb_account()
            .returning(|name, _| Ok(Some(ready_account(name))));
        mock.expect_get_secret()
            .returning(|_, _| Ok(Some(secret(&[DATABASE_PASSWORD_SELECTOR]))));
        assert!(resolve_database(&mock, &producer(), "openstack")
            .await
            .is_satisfied());
    }

    #[tokio::test]
    async fn database_account_not_ready_skips_secret_read() {
        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_mariadb_account().returning(|name, _| {
            Ok(Some(MariaDBAccount::new(name, MariaDBAccountSpec::default())))
        });
        mock.expect_get_secret().never();

        let outcome = resolve_database(&mock, &producer(), "openstack").await;
        let cond = outcome.to_condition(ConditionType::DbReady);
        assert_eq!(cond.reason, reasons::DATABASE_NOT_READY);
        assert_eq!(cond.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn network_attachments_report_every_missing_name() {
        let mut p = producer();
        p.spec.network_attachments = vec!["designate".to_string(), "internalapi".to_string()];

        let mut mock = MockProducerKubeClient::new();
        mock.expect_get_network_attachment().returning(|name, _| {
            if name == "designate" {
                Ok(Some(NetworkAttachmentDefinition::new(
                    name,
                    NetworkAttachmentDefinitionSpec::default(),
                )))
            } else {
                Ok(None)
            }
        });

        let outcome = resolve_network_attachments(&mock, &p, "openstack").await;
        let cond = outcome.to_condition(ConditionType::NetworkAttachmentsReady);
        assert_eq!(cond.reason, reasons::NETWORK_ATTACHMENTS_NOT_FOUND);
        assert!(cond.message.contains("internalapi"));
        assert!(!cond.message.contains("designate,"));
    }

    #[test]
    fn timeout_failure_is_warning() {
        let outcome = DependencyOutcome::Failed {
            reason: reasons::DATABASE_ERROR,
            error: Error::timeout("database"),
        };
        let cond = outcome.to_condition(ConditionType::DbReady);
        assert_eq!(cond.reason, reasons::TIMEOUT);
        assert_eq!(cond.severity, Some(Severity::Warning));
        assert_eq!(outcome.class(), Some(ErrorClass::Transient));
    }
}
