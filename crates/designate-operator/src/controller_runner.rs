//! Controller runner - builds the DesignateProducer controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use designate_common::crd::{producer_for_topology_finalizer, DesignateProducer, Topology};
use designate_producer::{error_policy, reconcile, Context, ControllerConfig};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the DesignateProducer controller future.
///
/// Besides the producers themselves it watches the owned StatefulSets and
/// config Secrets, and Topologies so that edits to a bound Topology reach
/// the producers placed by it.
pub fn build_producer_controller(
    client: Client,
    config: ControllerConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ctx = Arc::new(Context::from_client(client.clone(), config));
    let producers: Api<DesignateProducer> = Api::all(client.clone());
    let statefulsets: Api<StatefulSet> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let topologies: Api<Topology> = Api::all(client);

    tracing::info!("- DesignateProducer controller");

    Box::pin(
        Controller::new(producers, watcher_config())
            .owns(statefulsets, watcher_config())
            .owns(secrets, watcher_config())
            .watches(topologies, watcher_config(), |topology| {
                bound_producers(&topology)
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("DesignateProducer")),
    )
}

/// Producers holding a finalizer on `topology`, in whatever namespace they live
fn bound_producers(topology: &Topology) -> Vec<ObjectRef<DesignateProducer>> {
    topology
        .finalizers()
        .iter()
        .filter_map(|f| producer_for_topology_finalizer(f))
        .map(|(namespace, name)| ObjectRef::new(name).within(namespace))
        .collect()
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
