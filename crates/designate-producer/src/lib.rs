//! DesignateProducer controller
//!
//! Reconciles DesignateProducer resources against their prerequisites:
//! - Checks the input secret, messaging, database and network attachments
//! - Binds the requested placement Topology and guards it with a finalizer
//! - Renders the service config Secret and runs the StatefulSet
//! - Publishes progress as conditions reduced to one `Ready` condition
//!
//! The root cause of an unready producer is always the first unmet
//! dependency in a fixed order, so status points at what to fix first.

pub mod client;
pub mod config;
mod controller;
pub mod resolver;
pub mod topology;
pub mod workload;

#[cfg(test)]
mod fake;

pub use client::{ProducerKubeClient, ProducerKubeClientImpl};
pub use controller::{
    default_topology_selector, error_policy, reconcile, reconcile_producer, Context,
    ControllerConfig, Requeue, CONTROLLER_NAME,
};
