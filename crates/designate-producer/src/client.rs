//! Cluster access for the DesignateProducer reconciler
//!
//! Every read and write the reconciler performs goes through
//! [`ProducerKubeClient`] so that passes can be driven against mocks or an
//! in-memory cluster in tests. Reads return `Ok(None)` for missing objects;
//! only transport or permission failures are errors.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use designate_common::crd::{
    DesignateProducer, MariaDBAccount, NetworkAttachmentDefinition, Topology, TopologyRef,
    TransportURL, PRODUCER_FINALIZER,
};
use designate_common::kube_utils::{finalizer_patch, with_finalizer, without_finalizer};
use designate_common::retry::{retry_on_conflict, RetryConfig};
use designate_common::{Error, FIELD_MANAGER};

/// Kubernetes operations needed to reconcile a DesignateProducer
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProducerKubeClient: Send + Sync {
    /// Get a Secret
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Get a TransportURL
    async fn get_transport_url(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<TransportURL>, Error>;

    /// Get a MariaDBAccount
    async fn get_mariadb_account(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MariaDBAccount>, Error>;

    /// Get a NetworkAttachmentDefinition
    async fn get_network_attachment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, Error>;

    /// Get a Topology
    async fn get_topology(&self, name: &str, namespace: &str) -> Result<Option<Topology>, Error>;

    /// List Topologies in a namespace matching a label selector string
    async fn list_topologies(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Topology>, Error>;

    /// References to the Topologies, in any namespace, holding `finalizer`
    async fn list_topologies_holding(&self, finalizer: &str) -> Result<Vec<TopologyRef>, Error>;

    /// Add a finalizer to a Topology (no-op if present)
    async fn add_topology_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a Topology (no-op if absent or if the Topology is gone)
    async fn remove_topology_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Add the controller finalizer to a DesignateProducer
    async fn add_producer_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the controller finalizer from a DesignateProducer
    async fn remove_producer_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Server-side apply a ServiceAccount
    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<(), Error>;

    /// Server-side apply a Secret
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Server-side apply a StatefulSet, returning the stored object with its status
    async fn apply_statefulset(&self, statefulset: &StatefulSet) -> Result<StatefulSet, Error>;

    /// Replace the status of a DesignateProducer.
    ///
    /// The write is conditional on `metadata.resourceVersion`; a stale
    /// version fails with a conflict.
    async fn replace_producer_status(&self, producer: &DesignateProducer) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ProducerKubeClientImpl {
    client: Client,
}

impl ProducerKubeClientImpl {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_namespaced<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = obj.namespace().ok_or_else(|| {
            Error::validation_for_field(obj.name_any(), "metadata.namespace", "namespace required")
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        debug!(
            kind = %K::kind(&Default::default()),
            name = %obj.name_any(),
            "applying resource"
        );
        Ok(api.patch(&obj.name_any(), &params, &Patch::Apply(obj)).await?)
    }
}

#[derive(Clone, Copy, Debug)]
enum FinalizerEdit {
    Add,
    Remove,
}

/// Add or remove one finalizer with a resourceVersion-pinned merge patch,
/// re-reading and retrying on conflict.
async fn edit_finalizer<K>(
    api: &Api<K>,
    name: &str,
    namespace: &str,
    finalizer: &str,
    edit: FinalizerEdit,
) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    retry_on_conflict(&RetryConfig::conflict(), "edit_finalizer", || async move {
        let obj = match api.get(name).await {
            Ok(obj) => obj,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return match edit {
                    FinalizerEdit::Remove => Ok(()),
                    FinalizerEdit::Add => Err(Error::not_found(
                        K::kind(&Default::default()),
                        namespace,
                        name,
                    )),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let updated = match edit {
            FinalizerEdit::Add => with_finalizer(obj.meta(), finalizer),
            FinalizerEdit::Remove => without_finalizer(obj.meta(), finalizer),
        };
        let Some(finalizers) = updated else {
            return Ok(());
        };

        let patch = finalizer_patch(obj.meta(), &finalizers);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(name, finalizer, ?edit, "updated finalizers");
        Ok(())
    })
    .await
}

#[async_trait]
impl ProducerKubeClient for ProducerKubeClientImpl {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        self.get_namespaced(name, namespace).await
    }

    async fn get_transport_url(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<TransportURL>, Error> {
        self.get_namespaced(name, namespace).await
    }

    async fn get_mariadb_account(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MariaDBAccount>, Error> {
        self.get_namespaced(name, namespace).await
    }

    async fn get_network_attachment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, Error> {
        self.get_namespaced(name, namespace).await
    }

    async fn get_topology(&self, name: &str, namespace: &str) -> Result<Option<Topology>, Error> {
        self.get_namespaced(name, namespace).await
    }

    async fn list_topologies(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Topology>, Error> {
        let api: Api<Topology> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn list_topologies_holding(&self, finalizer: &str) -> Result<Vec<TopologyRef>, Error> {
        let api: Api<Topology> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .filter(|t| t.has_finalizer(finalizer))
            .map(Topology::reference)
            .collect())
    }

    async fn add_topology_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<Topology> = Api::namespaced(self.client.clone(), namespace);
        edit_finalizer(&api, name, namespace, finalizer, FinalizerEdit::Add).await
    }

    async fn remove_topology_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<Topology> = Api::namespaced(self.client.clone(), namespace);
        edit_finalizer(&api, name, namespace, finalizer, FinalizerEdit::Remove).await
    }

    async fn add_producer_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<DesignateProducer> = Api::namespaced(self.client.clone(), namespace);
        edit_finalizer(&api, name, namespace, PRODUCER_FINALIZER, FinalizerEdit::Add).await
    }

    async fn remove_producer_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<DesignateProducer> = Api::namespaced(self.client.clone(), namespace);
        edit_finalizer(&api, name, namespace, PRODUCER_FINALIZER, FinalizerEdit::Remove).await
    }

    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<(), Error> {
        self.apply(account).await.map(|_| ())
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.apply(secret).await.map(|_| ())
    }

    async fn apply_statefulset(&self, statefulset: &StatefulSet) -> Result<StatefulSet, Error> {
        self.apply(statefulset).await
    }

    async fn replace_producer_status(&self, producer: &DesignateProducer) -> Result<(), Error> {
        let namespace = producer.namespace().unwrap_or_default();
        let api: Api<DesignateProducer> = Api::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(producer)?;
        api.replace_status(&producer.name_any(), &PostParams::default(), data)
            .await?;
        Ok(())
    }
}
