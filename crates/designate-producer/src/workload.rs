//! Workload construction
//!
//! Builds the ServiceAccount and StatefulSet that run the producer service.
//! Placement comes from the bound Topology; the config hash annotation on the
//! pod template rolls pods whenever the rendered configuration changes.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, PodSpec, PodTemplateSpec, SecretVolumeSource, SecurityContext, ServiceAccount,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use serde_json::json;

use designate_common::crd::{DesignateProducer, Topology};
use designate_common::{
    CONFIG_HASH_ANNOTATION, LABEL_COMPONENT, LABEL_MANAGED_BY, LABEL_SERVICE, NETWORKS_ANNOTATION,
};

use crate::config::config_secret_name;

/// Value of the `service` label on everything the controller creates
pub const SERVICE_NAME: &str = "designate";

/// Value of the `component` label for producer workloads
pub const COMPONENT: &str = "designate-producer";

/// Script the init container runs to assemble the service config
const INIT_SCRIPT: &str = "/usr/local/bin/container-scripts/init.sh";

const CONFIG_VOLUME: &str = "config-data";
const CONFIG_MOUNT_PATH: &str = "/var/lib/config-data/default";

/// Labels stamped on every owned object and used as the pod selector
pub fn labels(producer: &DesignateProducer) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_SERVICE.to_string(), SERVICE_NAME.to_string()),
        (LABEL_COMPONENT.to_string(), COMPONENT.to_string()),
        (
            "designate.openstack.org/producer".to_string(),
            producer.name_any(),
        ),
        (
            LABEL_MANAGED_BY.to_string(),
            designate_common::FIELD_MANAGER.to_string(),
        ),
    ])
}

fn owned_meta(producer: &DesignateProducer, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: producer.namespace(),
        labels: Some(labels(producer)),
        owner_references: producer.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// Name of the workload's ServiceAccount
pub fn service_account_name(producer: &DesignateProducer) -> String {
    format!("{}-{}", SERVICE_NAME, producer.name_any())
}

/// ServiceAccount the producer pods run as
pub fn build_service_account(producer: &DesignateProducer) -> ServiceAccount {
    ServiceAccount {
        metadata: owned_meta(producer, service_account_name(producer)),
        ..Default::default()
    }
}

/// Multus annotation value for the requested attachments.
///
/// `None` when no attachments are requested.
pub fn networks_annotation(producer: &DesignateProducer, namespace: &str) -> Option<String> {
    if producer.spec.network_attachments.is_empty() {
        return None;
    }
    let networks: Vec<_> = producer
        .spec
        .network_attachments
        .iter()
        .map(|name| json!({ "name": name, "namespace": namespace }))
        .collect();
    Some(serde_json::Value::Array(networks).to_string())
}

fn config_mounts() -> Vec<VolumeMount> {
    vec![VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }]
}

fn init_container(image: &str) -> Container {
    Container {
        name: "init".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["/bin/bash".to_string()]),
        args: Some(vec!["-c".to_string(), INIT_SCRIPT.to_string()]),
        security_context: Some(SecurityContext {
            run_as_user: Some(0),
            ..Default::default()
        }),
        volume_mounts: Some(config_mounts()),
        ..Default::default()
    }
}

/// StatefulSet running the producer.
///
/// `topology` supplies spread constraints and affinity when bound.
pub fn build_statefulset(
    producer: &DesignateProducer,
    namespace: &str,
    config_hash: &str,
    topology: Option<&Topology>,
) -> StatefulSet {
    let labels = labels(producer);
    let image = producer.spec.container_image.as_str();

    let mut annotations = BTreeMap::from([(
        CONFIG_HASH_ANNOTATION.to_string(),
        config_hash.to_string(),
    )]);
    if let Some(networks) = networks_annotation(producer, namespace) {
        annotations.insert(NETWORKS_ANNOTATION.to_string(), networks);
    }

    let container = Container {
        name: COMPONENT.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["/bin/bash".to_string()]),
        args: Some(vec![
            "-c".to_string(),
            "/usr/local/bin/kolla_start".to_string(),
        ]),
        volume_mounts: Some(config_mounts()),
        ..Default::default()
    };

    let volume = Volume {
        name: CONFIG_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(config_secret_name(producer)),
            default_mode: Some(0o640),
            ..Default::default()
        }),
        ..Default::default()
    };

    let placement = topology.map(|t| &t.spec);

    StatefulSet {
        metadata: owned_meta(producer, producer.name_any()),
        spec: Some(StatefulSetSpec {
            replicas: Some(producer.spec.replicas),
            service_name: producer.name_any(),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account_name(producer)),
                    init_containers: Some(vec![init_container(image)]),
                    containers: vec![container],
                    volumes: Some(vec![volume]),
                    topology_spread_constraints: placement
                        .and_then(|p| p.topology_spread_constraints.clone()),
                    affinity: placement.and_then(|p| p.affinity.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ready replicas reported by the StatefulSet
pub fn ready_replicas(statefulset: &StatefulSet) -> i32 {
    statefulset
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}
