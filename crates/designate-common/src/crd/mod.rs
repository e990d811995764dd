//! Custom Resource Definitions for the Designate operator
//!
//! `DesignateProducer` and `Topology` are owned by this operator; the
//! dependency resources are owned by other operators and only read.

mod conditions;
mod dependencies;
mod producer;
mod topology;

pub use conditions::{
    reasons, Condition, ConditionSet, ConditionStatus, ConditionType, ConditionUpdater, Severity,
};
pub use dependencies::{
    is_ready, ready_message, MariaDBAccount, MariaDBAccountSpec, MariaDBAccountStatus,
    NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec, ResourceCondition, TransportURL,
    TransportURLSpec, TransportURLStatus, DATABASE_PASSWORD_SELECTOR,
};
pub use producer::{
    DesignateProducer, DesignateProducerSpec, DesignateProducerStatus, PasswordSelector,
    producer_for_topology_finalizer, ProducerPhase, DEFAULT_PRODUCER_IMAGE, PRODUCER_FINALIZER,
};
pub use topology::{Topology, TopologyHandler, TopologyRef, TopologySpec};
