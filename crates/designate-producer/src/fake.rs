//! In-memory cluster for multi-pass reconcile tests
//!
//! Implements [`ProducerKubeClient`] over plain maps. Producer status writes
//! check `resourceVersion` like the API server does, applied StatefulSets
//! keep the status the test sets through [`FakeCluster::set_ready_replicas`],
//! and a named read can be made to hang to exercise the pass deadline.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use designate_common::crd::{
    ConditionStatus, DesignateProducer, MariaDBAccount, MariaDBAccountSpec, MariaDBAccountStatus,
    NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec, ResourceCondition, Topology,
    TopologyRef, TopologySpec, TransportURL, TransportURLSpec, TransportURLStatus,
    DATABASE_PASSWORD_SELECTOR, PRODUCER_FINALIZER,
};
use designate_common::kube_utils::{with_finalizer, without_finalizer};
use designate_common::Error;

use crate::client::ProducerKubeClient;

pub(crate) const NS: &str = "openstack";

type Key = (String, String);

fn key(name: &str, namespace: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NS.to_string()),
        ..Default::default()
    }
}

fn ready_conditions(ready: bool) -> Vec<ResourceCondition> {
    vec![ResourceCondition {
        type_: "Ready".to_string(),
        status: if ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        },
        reason: None,
        message: Some(if ready { "ready" } else { "provisioning" }.to_string()),
    }]
}

#[derive(Default)]
struct State {
    rv: u64,
    secrets: BTreeMap<Key, Secret>,
    transports: BTreeMap<Key, TransportURL>,
    accounts: BTreeMap<Key, MariaDBAccount>,
    attachments: BTreeMap<Key, NetworkAttachmentDefinition>,
    topologies: BTreeMap<Key, Topology>,
    producers: BTreeMap<Key, DesignateProducer>,
    service_accounts: BTreeMap<Key, ServiceAccount>,
    statefulsets: BTreeMap<Key, StatefulSet>,
    ready_replicas: BTreeMap<Key, i32>,
    status_writes: usize,
    writes: Vec<String>,
    hang_on: Option<String>,
    fail_release: Option<String>,
}

impl State {
    fn next_rv(&mut self) -> Option<String> {
        self.rv += 1;
        Some(self.rv.to_string())
    }
}

/// Cluster state shared by the reconciler under test and the test body
#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_secret(&self, name: &str, keys: &[&str]) {
        let secret = Secret {
            metadata: meta(name),
            data: Some(
                keys.iter()
                    .map(|k| (k.to_string(), ByteString(format!("{}-value", k).into_bytes())))
                    .collect(),
            ),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(key(name, NS), secret);
    }

    pub(crate) fn put_transport(&self, name: &str, ready: bool) {
        let secret_name = format!("rabbitmq-transport-url-{}", name);
        let mut transport = TransportURL::new(name, TransportURLSpec::default());
        transport.metadata.namespace = Some(NS.to_string());
        transport.status = Some(TransportURLStatus {
            secret_name: ready.then(|| secret_name.clone()),
            conditions: ready_conditions(ready),
        });
        if ready {
            self.put_secret(&secret_name, &["transport_url"]);
        }
        self.state
            .lock()
            .unwrap()
            .transports
            .insert(key(name, NS), transport);
    }

    pub(crate) fn put_account(&self, name: &str, ready: bool) {
        let secret_name = format!("{}-db-secret", name);
        let mut account = MariaDBAccount::new(
            name,
            MariaDBAccountSpec {
                user_name: name.to_string(),
                secret: secret_name.clone(),
            },
        );
        account.metadata.namespace = Some(NS.to_string());
        account.status = Some(MariaDBAccountStatus {
            conditions: ready_conditions(ready),
        });
        if ready {
            self.put_secret(&secret_name, &[DATABASE_PASSWORD_SELECTOR]);
        }
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(key(name, NS), account);
    }

    pub(crate) fn put_attachment(&self, name: &str) {
        let mut nad =
            NetworkAttachmentDefinition::new(name, NetworkAttachmentDefinitionSpec::default());
        nad.metadata.namespace = Some(NS.to_string());
        self.state
            .lock()
            .unwrap()
            .attachments
            .insert(key(name, NS), nad);
    }

    pub(crate) fn put_topology(&self, name: &str, labels: &[(&str, &str)]) {
        let mut topology = Topology::new(name, TopologySpec::default());
        topology.metadata.namespace = Some(NS.to_string());
        topology.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        let mut state = self.state.lock().unwrap();
        topology.metadata.resource_version = state.next_rv();
        state.topologies.insert(key(name, NS), topology);
    }

    pub(crate) fn topology_finalizers(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .topologies
            .get(&key(name, NS))
            .and_then(|t| t.metadata.finalizers.clone())
            .unwrap_or_default()
    }

    /// Topologies currently holding `finalizer`
    pub(crate) fn topologies_holding(&self, finalizer: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .topologies
            .values()
            .filter(|t| t.has_finalizer(finalizer))
            .map(|t| t.name_any())
            .collect()
    }

    pub(crate) fn put_producer(&self, mut producer: DesignateProducer) {
        producer.metadata.namespace = Some(NS.to_string());
        producer.metadata.uid = Some(format!("uid-{}", producer.name_any()));
        producer.metadata.generation = Some(1);
        let mut state = self.state.lock().unwrap();
        producer.metadata.resource_version = state.next_rv();
        state
            .producers
            .insert(key(&producer.name_any(), NS), producer);
    }

    /// Edit a stored producer the way a user would, bumping its version
    pub(crate) fn edit_producer(&self, name: &str, edit: impl FnOnce(&mut DesignateProducer)) {
        let mut state = self.state.lock().unwrap();
        let rv = state.next_rv();
        let producer = state.producers.get_mut(&key(name, NS)).unwrap();
        edit(producer);
        producer.metadata.resource_version = rv;
    }

    pub(crate) fn mark_deleted(&self, name: &str) {
        self.edit_producer(name, |p| {
            p.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        });
    }

    pub(crate) fn producer(&self, name: &str) -> Option<DesignateProducer> {
        self.state
            .lock()
            .unwrap()
            .producers
            .get(&key(name, NS))
            .cloned()
    }

    pub(crate) fn statefulset(&self, name: &str) -> Option<StatefulSet> {
        self.state
            .lock()
            .unwrap()
            .statefulsets
            .get(&key(name, NS))
            .cloned()
    }

    pub(crate) fn secret(&self, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(name, NS))
            .cloned()
    }

    /// Simulate pods of a StatefulSet becoming ready
    pub(crate) fn set_ready_replicas(&self, name: &str, ready: i32) {
        let mut state = self.state.lock().unwrap();
        state.ready_replicas.insert(key(name, NS), ready);
        if let Some(sts) = state.statefulsets.get_mut(&key(name, NS)) {
            sts.status = Some(StatefulSetStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            });
        }
    }

    pub(crate) fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    /// Writes other than producer status, in order, as `verb kind/name`
    pub(crate) fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Make reads of the named TransportURL never complete
    pub(crate) fn hang_on_transport(&self, name: &str) {
        self.state.lock().unwrap().hang_on = Some(name.to_string());
    }

    /// Make the next finalizer removal from the named Topology fail
    pub(crate) fn fail_next_release(&self, topology: &str) {
        self.state.lock().unwrap().fail_release = Some(topology.to_string());
    }

    fn edit_topology_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
        add: bool,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let rv = state.next_rv();
        let Some(topology) = state.topologies.get_mut(&key(name, namespace)) else {
            return if add {
                Err(Error::not_found("Topology", namespace, name))
            } else {
                Ok(())
            };
        };
        let updated = if add {
            with_finalizer(&topology.metadata, finalizer)
        } else {
            without_finalizer(&topology.metadata, finalizer)
        };
        if let Some(finalizers) = updated {
            topology.metadata.finalizers = Some(finalizers);
            topology.metadata.resource_version = rv;
            let verb = if add { "add-finalizer" } else { "remove-finalizer" };
            state.writes.push(format!("{} topology/{}", verb, name));
        }
        Ok(())
    }

    fn edit_producer_finalizer(&self, name: &str, namespace: &str, add: bool) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let rv = state.next_rv();
        let Some(producer) = state.producers.get_mut(&key(name, namespace)) else {
            return if add {
                Err(Error::not_found("DesignateProducer", namespace, name))
            } else {
                Ok(())
            };
        };
        let updated = if add {
            with_finalizer(&producer.metadata, PRODUCER_FINALIZER)
        } else {
            without_finalizer(&producer.metadata, PRODUCER_FINALIZER)
        };
        if let Some(finalizers) = updated {
            producer.metadata.finalizers = Some(finalizers);
            producer.metadata.resource_version = rv;
        }
        Ok(())
    }
}

#[async_trait]
impl ProducerKubeClient for FakeCluster {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .get(&key(name, namespace))
            .cloned())
    }

    async fn get_transport_url(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<TransportURL>, Error> {
        let hang = self.state.lock().unwrap().hang_on.as_deref() == Some(name);
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .transports
            .get(&key(name, namespace))
            .cloned())
    }

    async fn get_mariadb_account(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MariaDBAccount>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .get(&key(name, namespace))
            .cloned())
    }

    async fn get_network_attachment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attachments
            .get(&key(name, namespace))
            .cloned())
    }

    async fn get_topology(&self, name: &str, namespace: &str) -> Result<Option<Topology>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .topologies
            .get(&key(name, namespace))
            .cloned())
    }

    async fn list_topologies(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Topology>, Error> {
        // Equality terms only; enough for the default selector.
        let terms: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter_map(|term| term.split_once('='))
            .collect();
        Ok(self
            .state
            .lock()
            .unwrap()
            .topologies
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, t)| {
                let labels = t.labels();
                terms
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn list_topologies_holding(&self, finalizer: &str) -> Result<Vec<TopologyRef>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .topologies
            .values()
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
        self.edit_topology_finalizer(name, namespace, finalizer, true)
    }

    async fn remove_topology_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_release.as_deref() == Some(name) {
                state.fail_release = None;
                return Err(Error::internal(format!("injected failure releasing {}", name)));
            }
        }
        self.edit_topology_finalizer(name, namespace, finalizer, false)
    }

    async fn add_producer_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.edit_producer_finalizer(name, namespace, true)
    }

    async fn remove_producer_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.edit_producer_finalizer(name, namespace, false)
    }

    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = key(&account.name_any(), NS);
        if state.service_accounts.get(&k) != Some(account) {
            state.writes.push(format!("apply serviceaccount/{}", account.name_any()));
            state.service_accounts.insert(k, account.clone());
        }
        Ok(())
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = key(&secret.name_any(), NS);
        if state.secrets.get(&k) != Some(secret) {
            state.writes.push(format!("apply secret/{}", secret.name_any()));
            state.secrets.insert(k, secret.clone());
        }
        Ok(())
    }

    async fn apply_statefulset(&self, statefulset: &StatefulSet) -> Result<StatefulSet, Error> {
        let mut state = self.state.lock().unwrap();
        let k = key(&statefulset.name_any(), NS);
        let mut stored = statefulset.clone();
        stored.status = state
            .ready_replicas
            .get(&k)
            .map(|ready| StatefulSetStatus {
                ready_replicas: Some(*ready),
                ..Default::default()
            });
        let changed = state
            .statefulsets
            .get(&k)
            .map_or(true, |existing| existing.spec != stored.spec);
        if changed {
            state
                .writes
                .push(format!("apply statefulset/{}", statefulset.name_any()));
        }
        state.statefulsets.insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace_producer_status(&self, producer: &DesignateProducer) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let rv = state.next_rv();
        let name = producer.name_any();
        let Some(stored) = state.producers.get_mut(&key(&name, NS)) else {
            return Err(Error::not_found("DesignateProducer", NS, &name));
        };
        if stored.metadata.resource_version != producer.metadata.resource_version {
            return Err(Error::conflict("DesignateProducer", name));
        }
        stored.status = producer.status.clone();
        stored.metadata.resource_version = rv;
        state.status_writes += 1;
        Ok(())
    }
}
