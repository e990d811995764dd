//! Topology binding
//!
//! Resolves an entity's requested Topology, keeps the entity's finalizer on
//! exactly the Topology it is bound to, and records the binding in status.
//!
//! On a rebind the finalizer is added to the new Topology before it is
//! removed anywhere else, so a Topology never loses protection while some
//! entity is still placed by it. Stale holders are found by listing the
//! cluster, since a pass cut off between the add and the release leaves no
//! record of them in status.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::{debug, info};

use designate_common::crd::{
    reasons, Condition, ConditionType, ConditionUpdater, Severity, Topology, TopologyHandler,
    TopologyRef,
};
use designate_common::kube_utils::label_selector_string;
use designate_common::Error;

use crate::client::ProducerKubeClient;

/// Message recorded on a True TopologyReady condition
pub const TOPOLOGY_READY_MESSAGE: &str = "Topology config create completed";

/// Bind `instance` to the Topology its spec requests.
///
/// * No reference: release every Topology holding the finalizer, clear the
///   last applied reference and drop the TopologyReady condition. Returns
///   `Ok(None)`.
/// * Resolution failure: returns the error with the last applied reference
///   untouched; the caller records the failure condition.
/// * Success: finalizer added to the bound Topology and removed from every
///   other one, last applied reference updated, TopologyReady marked True.
///   Returns the bound Topology.
///
/// A pass whose reference and binding already agree performs no writes.
pub async fn ensure_topology<E>(
    kube: &dyn ProducerKubeClient,
    instance: &mut E,
    namespace: &str,
    finalizer: &str,
    default_selector: &LabelSelector,
) -> Result<Option<Topology>, Error>
where
    E: TopologyHandler + ConditionUpdater,
{
    let Some(desired) = instance.spec_topology_ref().cloned() else {
        for released in release_stale(kube, finalizer, None).await? {
            info!(topology = %released, "released topology");
        }
        instance.set_last_applied_topology(None);
        instance.remove_condition(ConditionType::TopologyReady);
        return Ok(None);
    };

    let topology = resolve(kube, &desired, namespace, default_selector).await?;
    let bound = topology.reference();
    let bound_namespace = bound.resolve_namespace(namespace).to_string();

    if !topology.has_finalizer(finalizer) {
        kube.add_topology_finalizer(&bound.name, &bound_namespace, finalizer)
            .await?;
        debug!(topology = %bound, "added finalizer to topology");
    }

    for released in release_stale(kube, finalizer, Some(&bound)).await? {
        info!(from = %released, to = %bound, "rebound topology");
    }

    instance.set_last_applied_topology(Some(bound));
    instance.mark_true(ConditionType::TopologyReady, TOPOLOGY_READY_MESSAGE);
    Ok(Some(topology))
}

/// Remove `finalizer` from every Topology holding it except `keep`.
///
/// Returns the Topologies released. Every release is attempted; the first
/// failure is returned after the rest have run.
pub async fn release_stale(
    kube: &dyn ProducerKubeClient,
    finalizer: &str,
    keep: Option<&TopologyRef>,
) -> Result<Vec<TopologyRef>, Error> {
    let mut released = Vec::new();
    let mut first_error = None;
    for holder in kube.list_topologies_holding(finalizer).await? {
        if Some(&holder) == keep {
            continue;
        }
        let namespace = holder.namespace.as_deref().unwrap_or_default();
        match kube
            .remove_topology_finalizer(&holder.name, namespace, finalizer)
            .await
        {
            Ok(()) => released.push(holder),
            Err(e) => {
                debug!(topology = %holder, error = %e, "failed to release topology");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(released),
    }
}

/// Resolve a reference to exactly one Topology.
///
/// A qualified reference is a direct lookup. An unqualified one lists the
/// namespace with the default selector and requires a single match.
async fn resolve(
    kube: &dyn ProducerKubeClient,
    desired: &TopologyRef,
    namespace: &str,
    default_selector: &LabelSelector,
) -> Result<Topology, Error> {
    let ns = desired.resolve_namespace(namespace);

    if desired.is_qualified() {
        return kube
            .get_topology(&desired.name, ns)
            .await?
            .ok_or_else(|| Error::not_found("Topology", ns, &desired.name));
    }

    let selector = label_selector_string(default_selector)?;
    let mut matches = kube.list_topologies(ns, &selector).await?;
    match matches.len() {
        0 => Err(Error::not_found(
            "Topology",
            ns,
            format!("<selector {}>", selector),
        )),
        1 => Ok(matches.remove(0)),
        n => {
            let mut names: Vec<String> = matches
                .iter()
                .filter_map(|t| t.metadata.name.clone())
                .collect();
            names.sort();
            Err(Error::ambiguous(
                "Topology",
                format!(
                    "{} topologies match selector {}: {}",
                    n,
                    selector,
                    names.join(",")
                ),
            ))
        }
    }
}

/// Condition recording a failed binding
pub fn failure_condition(error: &Error) -> Condition {
    let (reason, severity) = match error {
        Error::NotFound { .. } => (reasons::TOPOLOGY_NOT_FOUND, Severity::Warning),
        Error::Ambiguous { .. } => (reasons::TOPOLOGY_AMBIGUOUS, Severity::Warning),
        Error::Timeout { .. } => (reasons::TIMEOUT, Severity::Warning),
        Error::Validation { .. } => (reasons::TOPOLOGY_ERROR, Severity::Warning),
        _ => (reasons::TOPOLOGY_ERROR, Severity::Error),
    };
    Condition::not_ready(
        ConditionType::TopologyReady,
        reason,
        severity,
        format!("Topology error occurred: {}", error),
    )
}
