//! Kafka cluster administration via ZooKeeper and the broker admin protocol.
//!
//! Cluster metadata has two sources of truth: the coordination service holds
//! the intended state (assignments, configs, control documents) and the
//! brokers report the live state (leaders, ISRs). [`AdminClient`] exposes
//! both and mutates the intended state the way the controller expects:
//! rigid JSON documents at rigid paths, compare-and-set writes, and
//! sequential change notices.

pub mod broker;
pub mod client;
pub mod types;
pub mod zk;

pub use client::{AdminClient, ClientBuilder};
