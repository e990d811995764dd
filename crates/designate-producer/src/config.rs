//! Service configuration rendering
//!
//! Reads the credentials the dependency steps proved available and renders
//! them into the `<name>-config-data` Secret mounted by the workload. The
//! content hash is recorded in status and on the pod template so that a
//! configuration change rolls the pods.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use designate_common::crd::{DesignateProducer, DATABASE_PASSWORD_SELECTOR};
use designate_common::kube_utils::deterministic_hash;
use designate_common::Error;

use crate::client::ProducerKubeClient;
use crate::resolver::missing_keys;
use crate::workload::labels;

/// Key in the TransportURL secret holding the URL
pub const TRANSPORT_URL_KEY: &str = "transport_url";

/// Key under `status.hash` for the rendered configuration
pub const CONFIG_HASH_KEY: &str = "config";

/// Name of the database the service uses
pub const DATABASE_NAME: &str = "designate";

/// Credentials gathered for rendering
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigInputs {
    /// Keystone service user password
    pub service_password: String,
    /// Messaging URL, when a TransportURL is referenced
    pub transport_url: Option<String>,
    /// Database user
    pub database_user: String,
    /// Database password
    pub database_password: String,
}

/// The rendered config Secret and its content hash
#[derive(Clone, Debug)]
pub struct RenderedConfig {
    /// Secret to apply
    pub secret: Secret,
    /// Hash of the rendered files
    pub hash: String,
}

/// Name of the rendered config Secret
pub fn config_secret_name(producer: &DesignateProducer) -> String {
    format!("{}-config-data", producer.name_any())
}

async fn secret_value(
    kube: &dyn ProducerKubeClient,
    name: &str,
    namespace: &str,
    key: &str,
) -> Result<String, Error> {
    let secret = kube
        .get_secret(name, namespace)
        .await?
        .ok_or_else(|| Error::not_found("Secret", namespace, name))?;
    if !missing_keys(&secret, &[key]).is_empty() {
        return Err(Error::validation_for_field(
            format!("secret/{}", name),
            key,
            format!("missing key {}", key),
        ));
    }
    let value = secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key).cloned())
        .or_else(|| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|b| String::from_utf8_lossy(&b.0).into_owned())
        })
        .unwrap_or_default();
    Ok(value)
}

/// Read every credential the config needs.
pub async fn gather_inputs(
    kube: &dyn ProducerKubeClient,
    producer: &DesignateProducer,
    namespace: &str,
) -> Result<ConfigInputs, Error> {
    let spec = &producer.spec;
    let service_password = secret_value(
        kube,
        &spec.secret,
        namespace,
        &spec.password_selectors.service,
    )
    .await?;

    let transport_url = match spec.transport_url.as_deref() {
        Some(name) => {
            let transport = kube
                .get_transport_url(name, namespace)
                .await?
                .ok_or_else(|| Error::not_found("TransportURL", namespace, name))?;
            let secret_name = transport.secret_name().ok_or_else(|| {
                Error::validation_for_field(name, "status.secretName", "secret not published")
            })?;
            Some(secret_value(kube, secret_name, namespace, TRANSPORT_URL_KEY).await?)
        }
        None => None,
    };

    let account = kube
        .get_mariadb_account(&spec.database_account, namespace)
        .await?
        .ok_or_else(|| Error::not_found("MariaDBAccount", namespace, &spec.database_account))?;
    let database_password = secret_value(
        kube,
        &account.spec.secret,
        namespace,
        DATABASE_PASSWORD_SELECTOR,
    )
    .await?;

    Ok(ConfigInputs {
        service_password,
        transport_url,
        database_user: account.spec.user_name,
        database_password,
    })
}

fn designate_conf(producer: &DesignateProducer, inputs: &ConfigInputs) -> String {
    let spec = &producer.spec;
    let mut conf = String::from("[DEFAULT]\n");
    if let Some(url) = &inputs.transport_url {
        conf.push_str(&format!("transport_url = {}\n", url));
    }
    conf.push_str(&format!(
        "\n[database]\nconnection = mysql+pymysql://{}:{}@{}/{}?read_default_file=/etc/my.cnf\n",
        inputs.database_user, inputs.database_password, spec.database_hostname, DATABASE_NAME
    ));
    conf.push_str(&format!(
        "\n[keystone_authtoken]\nauth_type = password\nusername = {}\npassword = {}\n",
        spec.service_user, inputs.service_password
    ));
    conf.push_str("\n[producer]\nworkers = 1\nthreads = 1000\n");
    conf
}

/// Render the config Secret.
///
/// The hash covers every rendered file in key order, so identical inputs
/// always yield an identical hash.
pub fn render(producer: &DesignateProducer, inputs: &ConfigInputs) -> RenderedConfig {
    let files = BTreeMap::from([
        (
            "designate.conf".to_string(),
            designate_conf(producer, inputs),
        ),
        (
            "custom.conf".to_string(),
            producer.spec.custom_service_config.clone(),
        ),
        ("my.cnf".to_string(), "[client]\nssl=0\n".to_string()),
    ]);

    let digest_input: String = files
        .iter()
        .map(|(k, v)| format!("{}\n{}\n", k, v))
        .collect();
    let hash = deterministic_hash(&digest_input);

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(config_secret_name(producer)),
            namespace: producer.namespace(),
            labels: Some(labels(producer)),
            owner_references: producer.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        string_data: Some(files),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    RenderedConfig { secret, hash }
}
