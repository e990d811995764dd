//! DesignateProducer reconciliation controller
//!
//! One pass walks the dependency steps in a fixed order:
//!
//! input secret → service account → topology → transport → database →
//! network attachments → service config → workload
//!
//! Each step records its condition. The first step that is not satisfied
//! stops the pass; the aggregate `Ready` condition and the rest of status
//! are then committed in a single write and the pass requeues with a delay
//! chosen by the kind of failure. Nothing a step reports is carried to the
//! next pass except through the committed status.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use designate_common::crd::{
    reasons, Condition, ConditionSet, ConditionType, ConditionUpdater, DesignateProducer,
    ProducerPhase, Severity, Topology, TopologyHandler,
};
use designate_common::events::{
    actions, reasons as event_reasons, EventPublisher, KubeEventPublisher,
};
use designate_common::retry::backoff_delay;
use designate_common::{Error, ErrorClass, DEFAULT_TOPOLOGY_LABEL};

use crate::client::{ProducerKubeClient, ProducerKubeClientImpl};
use crate::config::{self, CONFIG_HASH_KEY};
use crate::resolver::{self, DependencyOutcome};
use crate::topology;
use crate::workload;

/// Name the controller reports events under
pub const CONTROLLER_NAME: &str = "designate-producer-controller";

/// Tunables for the reconciler
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Requeue delay while a dependency is still coming up
    pub unready_requeue: Duration,
    /// Requeue delay while a reference points at nothing
    pub misconfiguration_requeue: Duration,
    /// First requeue delay after a backend error
    pub transient_requeue: Duration,
    /// Ceiling for the backend error backoff
    pub transient_requeue_max: Duration,
    /// Requeue delay once everything is Ready
    pub steady_requeue: Duration,
    /// Time budget for one pass
    pub pass_deadline: Duration,
    /// Selector resolving an unnamed topology reference
    pub default_topology_selector: LabelSelector,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            unready_requeue: Duration::from_secs(10),
            misconfiguration_requeue: Duration::from_secs(60),
            transient_requeue: Duration::from_secs(5),
            transient_requeue_max: Duration::from_secs(300),
            steady_requeue: Duration::from_secs(300),
            pass_deadline: Duration::from_secs(30),
            default_topology_selector: default_topology_selector(),
        }
    }
}

/// Selector matching Topologies labelled as the namespace default
pub fn default_topology_selector() -> LabelSelector {
    LabelSelector {
        match_labels: Some(
            [(DEFAULT_TOPOLOGY_LABEL.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

/// When the controller should look at an entity again
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next watch event
    None,
    /// Right away
    Immediately,
    /// After a delay
    After(Duration),
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::None => Action::await_change(),
            Requeue::Immediately => Action::requeue(Duration::ZERO),
            Requeue::After(delay) => Action::requeue(delay),
        }
    }
}

/// Shared state for the DesignateProducer controller
pub struct Context {
    /// Cluster access
    pub kube: Arc<dyn ProducerKubeClient>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Tunables
    pub config: ControllerConfig,
    /// Consecutive transient failures per `namespace/name`
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn ProducerKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
            failures: DashMap::new(),
        }
    }

    /// Create a context backed by a real cluster
    pub fn from_client(client: Client, config: ControllerConfig) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
        Self::new(Arc::new(ProducerKubeClientImpl::new(client)), events, config)
    }

    /// Create a context for testing with a mock or in-memory cluster
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn ProducerKubeClient>) -> Self {
        Self::new(
            kube,
            Arc::new(designate_common::events::NoopEventPublisher),
            ControllerConfig::default(),
        )
    }

    /// Delay for a pass that stopped on `class`, tracking transient backoff
    fn requeue_for(&self, key: &str, class: Option<ErrorClass>) -> Requeue {
        if class != Some(ErrorClass::Transient) {
            self.failures.remove(key);
        }
        match class {
            None => Requeue::After(self.config.steady_requeue),
            Some(ErrorClass::Unready) => Requeue::After(self.config.unready_requeue),
            Some(ErrorClass::Misconfiguration) => {
                Requeue::After(self.config.misconfiguration_requeue)
            }
            Some(ErrorClass::Conflict) => Requeue::Immediately,
            Some(ErrorClass::Transient) => Requeue::After(self.transient_backoff(key)),
        }
    }

    fn transient_backoff(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        *failures += 1;
        backoff_delay(
            self.config.transient_requeue,
            self.config.transient_requeue_max,
            *failures,
        )
    }
}

/// Reconcile a DesignateProducer
#[instrument(skip(producer, ctx), fields(producer = %producer.name_any()))]
pub async fn reconcile(
    producer: Arc<DesignateProducer>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    debug!("reconciling producer");
    match reconcile_producer(&producer, &ctx).await {
        Ok(requeue) => Ok(requeue.into()),
        Err(e) => {
            if !e.is_conflict() {
                publish(
                    &ctx,
                    &producer,
                    EventType::Warning,
                    event_reasons::RECONCILE_FAILED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            }
            Err(e)
        }
    }
}

/// Error policy for the DesignateProducer controller
///
/// Errors reaching here come from finalizer or status writes. Retryable
/// errors back off like any transient failure; the rest wait for the
/// misconfiguration delay.
pub fn error_policy(
    producer: Arc<DesignateProducer>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        producer = %producer.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    let key = entity_key(&producer);
    if error.is_conflict() {
        return Requeue::Immediately.into();
    }
    if error.is_retryable() {
        Requeue::After(ctx.transient_backoff(&key)).into()
    } else {
        Requeue::After(ctx.config.misconfiguration_requeue).into()
    }
}

fn entity_key(producer: &DesignateProducer) -> String {
    format!(
        "{}/{}",
        producer.namespace().unwrap_or_default(),
        producer.name_any()
    )
}

/// One reconcile pass over `producer`.
///
/// Dependency failures are recorded in status and turned into a requeue
/// delay; only failures to write the producer itself are returned as errors.
pub async fn reconcile_producer(
    producer: &DesignateProducer,
    ctx: &Context,
) -> Result<Requeue, Error> {
    let name = producer.name_any();
    let namespace = producer
        .namespace()
        .ok_or_else(|| Error::validation("DesignateProducer must be namespaced"))?;

    if producer.is_deleting() {
        return cleanup(producer, &namespace, ctx).await;
    }

    if !producer.has_finalizer() {
        ctx.kube.add_producer_finalizer(&name, &namespace).await?;
        info!(producer = %name, "added finalizer");
        publish(
            ctx,
            producer,
            EventType::Normal,
            event_reasons::INITIALIZED,
            actions::RECONCILE,
            None,
        )
        .await;
        return Ok(Requeue::Immediately);
    }

    let deadline = Instant::now() + ctx.config.pass_deadline;
    let mut pass = Pass {
        ctx,
        namespace: &namespace,
        deadline,
        desired: producer.clone(),
        topology: None,
        config_hash: None,
    };
    let blocker = pass.run().await.err();
    let mut desired = pass.desired;

    let status = desired.status_mut();
    status.conditions.set_ready();
    status.phase = phase_of(&status.conditions);
    status.observed_generation = producer.metadata.generation;

    let key = entity_key(producer);
    match blocker {
        Some(class) => debug!(producer = %name, ?class, phase = %status.phase, "pass stopped"),
        None => debug!(producer = %name, "pass complete"),
    }

    if producer.status == desired.status {
        debug!(producer = %name, "status unchanged, skipping update");
    } else {
        match ctx.kube.replace_producer_status(&desired).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!(producer = %name, "status write conflicted, requeueing");
                return Ok(Requeue::Immediately);
            }
            Err(e) => return Err(e),
        }
        announce_readiness(ctx, producer, &desired).await;
    }

    Ok(ctx.requeue_for(&key, blocker))
}

/// Release every topology holding this producer's finalizer, then drop the
/// controller finalizer.
async fn cleanup(
    producer: &DesignateProducer,
    namespace: &str,
    ctx: &Context,
) -> Result<Requeue, Error> {
    if !producer.has_finalizer() {
        return Ok(Requeue::None);
    }
    let name = producer.name_any();
    let finalizer = producer.topology_finalizer();
    let kube = ctx.kube.as_ref();

    for released in topology::release_stale(kube, &finalizer, None).await? {
        debug!(producer = %name, topology = %released, "released topology");
    }

    ctx.kube.remove_producer_finalizer(&name, namespace).await?;
    ctx.failures.remove(&entity_key(producer));
    info!(producer = %name, "released finalizers");
    publish(
        ctx,
        producer,
        EventType::Normal,
        event_reasons::DELETED,
        actions::DELETE,
        None,
    )
    .await;
    Ok(Requeue::None)
}

/// Working state of one pass
struct Pass<'a> {
    ctx: &'a Context,
    namespace: &'a str,
    deadline: Instant,
    /// Local copy whose status collects this pass's results
    desired: DesignateProducer,
    topology: Option<Topology>,
    config_hash: Option<String>,
}

impl Pass<'_> {
    async fn run(&mut self) -> Result<(), ErrorClass> {
        self.input().await?;
        self.service_account().await?;
        self.topology().await?;
        self.transport().await?;
        self.database().await?;
        self.network_attachments().await?;
        self.service_config().await?;
        self.workload().await
    }

    fn kube(&self) -> &dyn ProducerKubeClient {
        self.ctx.kube.as_ref()
    }

    /// Run `step` against the pass deadline
    async fn bounded<T>(
        &self,
        step: &str,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .unwrap_or_else(|_| Err(Error::timeout(step)))
    }

    async fn resolve(
        &self,
        step: &str,
        fut: impl Future<Output = DependencyOutcome>,
    ) -> DependencyOutcome {
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .unwrap_or_else(|_| timed_out(step))
    }

    fn record(&mut self, type_: ConditionType, outcome: DependencyOutcome) -> Result<(), ErrorClass> {
        self.desired.set(outcome.to_condition(type_));
        let Some(class) = outcome.class() else {
            return Ok(());
        };
        match outcome.error() {
            Some(error) => warn!(
                condition = %type_,
                ?class,
                retryable = outcome.is_retryable(),
                error = %error,
                "dependency read failed"
            ),
            None => debug!(condition = %type_, ?class, "dependency not satisfied"),
        }
        Err(class)
    }

    fn fail(&mut self, type_: ConditionType, reason: &str, error: Error) -> ErrorClass {
        warn!(condition = %type_, error = %error, "step failed");
        self.desired.set(step_failure(type_, reason, &error));
        step_class(&error)
    }

    async fn input(&mut self) -> Result<(), ErrorClass> {
        let outcome = self
            .resolve(
                "input",
                resolver::resolve_input(self.kube(), &self.desired, self.namespace),
            )
            .await;
        self.record(ConditionType::InputReady, outcome)
    }

    async fn service_account(&mut self) -> Result<(), ErrorClass> {
        let account = workload::build_service_account(&self.desired);
        let applied = self
            .bounded(
                "service account",
                self.kube().apply_service_account(&account),
            )
            .await;
        match applied {
            Ok(()) => {
                self.desired
                    .mark_true(ConditionType::ServiceAccountReady, "ServiceAccount created");
                Ok(())
            }
            Err(e) => Err(self.fail(
                ConditionType::ServiceAccountReady,
                reasons::SERVICE_ACCOUNT_ERROR,
                e,
            )),
        }
    }

    async fn topology(&mut self) -> Result<(), ErrorClass> {
        let previous = self.desired.last_applied_topology().cloned();
        let finalizer = self.desired.topology_finalizer();
        let kube = self.ctx.kube.as_ref();
        let bound = tokio::time::timeout_at(
            self.deadline,
            topology::ensure_topology(
                kube,
                &mut self.desired,
                self.namespace,
                &finalizer,
                &self.ctx.config.default_topology_selector,
            ),
        )
        .await
        .unwrap_or_else(|_| Err(Error::timeout("topology")));

        match bound {
            Ok(topology) => {
                let current = self.desired.last_applied_topology().cloned();
                if current != previous {
                    let (reason, note) = match &current {
                        Some(t) => (event_reasons::TOPOLOGY_BOUND, format!("bound to {}", t)),
                        None => (event_reasons::TOPOLOGY_RELEASED, "released".to_string()),
                    };
                    publish(
                        self.ctx,
                        &self.desired,
                        EventType::Normal,
                        reason,
                        actions::RECONCILE,
                        Some(note),
                    )
                    .await;
                }
                self.topology = topology;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "topology binding failed");
                self.desired.set(topology::failure_condition(&e));
                Err(step_class(&e))
            }
        }
    }

    async fn transport(&mut self) -> Result<(), ErrorClass> {
        let resolved = tokio::time::timeout_at(
            self.deadline,
            resolver::resolve_transport(self.kube(), &self.desired, self.namespace),
        )
        .await;
        match resolved {
            Ok(None) => {
                self.desired.remove_condition(ConditionType::TransportUrlReady);
                Ok(())
            }
            Ok(Some(outcome)) => self.record(ConditionType::TransportUrlReady, outcome),
            Err(_) => self.record(ConditionType::TransportUrlReady, timed_out("transport")),
        }
    }

    async fn database(&mut self) -> Result<(), ErrorClass> {
        let outcome = self
            .resolve(
                "database",
                resolver::resolve_database(self.kube(), &self.desired, self.namespace),
            )
            .await;
        self.record(ConditionType::DbReady, outcome)
    }

    async fn network_attachments(&mut self) -> Result<(), ErrorClass> {
        let outcome = self
            .resolve(
                "network attachments",
                resolver::resolve_network_attachments(self.kube(), &self.desired, self.namespace),
            )
            .await;
        self.record(ConditionType::NetworkAttachmentsReady, outcome)
    }

    async fn service_config(&mut self) -> Result<(), ErrorClass> {
        let rendered = self
            .bounded("service config", async {
                let inputs =
                    config::gather_inputs(self.kube(), &self.desired, self.namespace).await?;
                let rendered = config::render(&self.desired, &inputs);
                self.kube().apply_secret(&rendered.secret).await?;
                Ok(rendered)
            })
            .await;
        match rendered {
            Ok(rendered) => {
                self.desired
                    .status_mut()
                    .hash
                    .insert(CONFIG_HASH_KEY.to_string(), rendered.hash.clone());
                self.config_hash = Some(rendered.hash);
                self.desired.mark_true(
                    ConditionType::ServiceConfigReady,
                    "Service config create completed",
                );
                Ok(())
            }
            Err(e) => Err(self.fail(
                ConditionType::ServiceConfigReady,
                reasons::SERVICE_CONFIG_ERROR,
                e,
            )),
        }
    }

    async fn workload(&mut self) -> Result<(), ErrorClass> {
        let hash = self.config_hash.clone().unwrap_or_default();
        let statefulset = workload::build_statefulset(
            &self.desired,
            self.namespace,
            &hash,
            self.topology.as_ref(),
        );
        let applied = self
            .bounded("workload", self.kube().apply_statefulset(&statefulset))
            .await;
        let applied = match applied {
            Ok(applied) => applied,
            Err(e) => {
                return Err(self.fail(
                    ConditionType::DeploymentReady,
                    reasons::DEPLOYMENT_ERROR,
                    e,
                ))
            }
        };

        let ready = workload::ready_replicas(&applied);
        let desired_replicas = self.desired.spec.replicas;
        self.desired.status_mut().ready_count = ready;
        if ready == desired_replicas {
            self.desired
                .mark_true(ConditionType::DeploymentReady, "Deployment completed");
            Ok(())
        } else {
            self.desired.set(Condition::not_ready(
                ConditionType::DeploymentReady,
                reasons::DEPLOYMENT_IN_PROGRESS,
                Severity::Info,
                format!(
                    "Deployment in progress: {}/{} replicas ready",
                    ready, desired_replicas
                ),
            ));
            Err(ErrorClass::Unready)
        }
    }
}

fn timed_out(step: &str) -> DependencyOutcome {
    DependencyOutcome::Failed {
        reason: reasons::TIMEOUT,
        error: Error::timeout(step),
    }
}

/// Condition for a step that failed with `error`
fn step_failure(type_: ConditionType, reason: &str, error: &Error) -> Condition {
    let (reason, severity) = match error {
        Error::Timeout { .. } => (reasons::TIMEOUT, Severity::Warning),
        e if e.class() == ErrorClass::Misconfiguration => (reason, Severity::Warning),
        _ => (reason, Severity::Error),
    };
    Condition::not_ready(type_, reason, severity, error.to_string())
}

/// Requeue class of a step error; a pass that ran out of time backs off
fn step_class(error: &Error) -> ErrorClass {
    match error {
        Error::Timeout { .. } => ErrorClass::Transient,
        e => e.class(),
    }
}

/// Lifecycle phase implied by the conditions
fn phase_of(conditions: &ConditionSet) -> ProducerPhase {
    if conditions.is_true(ConditionType::Ready) {
        return ProducerPhase::Ready;
    }
    let blocker = ConditionType::PRIORITY
        .iter()
        .filter_map(|t| conditions.get(*t))
        .find(|c| !c.is_true());
    match blocker {
        Some(c) if c.type_ == ConditionType::DeploymentReady => {
            if c.reason == reasons::DEPLOYMENT_IN_PROGRESS {
                ProducerPhase::Deploying
            } else {
                ProducerPhase::ConfigReady
            }
        }
        _ => ProducerPhase::Pending,
    }
}

/// Publish an event when the aggregate Ready condition flips
async fn announce_readiness(ctx: &Context, before: &DesignateProducer, after: &DesignateProducer) {
    let was_ready = ready_condition(before).is_some_and(Condition::is_true);
    let Some(ready) = ready_condition(after) else {
        return;
    };
    if ready.is_true() && !was_ready {
        info!(producer = %after.name_any(), "producer ready");
        publish(
            ctx,
            after,
            EventType::Normal,
            event_reasons::READY,
            actions::RECONCILE,
            None,
        )
        .await;
    } else if !ready.is_true() && was_ready {
        publish(
            ctx,
            after,
            EventType::Warning,
            event_reasons::DEPENDENCY_NOT_READY,
            actions::RECONCILE,
            Some(ready.message.clone()),
        )
        .await;
    }
}

fn ready_condition(producer: &DesignateProducer) -> Option<&Condition> {
    producer
        .conditions()
        .and_then(|c| c.get(ConditionType::Ready))
}

async fn publish(
    ctx: &Context,
    producer: &DesignateProducer,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&producer.object_ref(&()), type_, reason, action, note)
        .await;
}
