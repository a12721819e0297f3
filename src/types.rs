//! Flat records describing cluster metadata.
//!
//! Topics, partitions, and brokers reference each other by ID. The same
//! partition may be described twice with different authorities: the
//! coordination service holds the intended assignment, the brokers report the
//! live placement. Both views use [`PartitionInfo`]; replica order is
//! meaningful (index 0 is the preferred leader) while ISR order is not.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A topic as recorded in the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    /// The topic name.
    pub name: String,

    /// Topic-level config overrides. Empty if the topic has no config
    /// document.
    pub config: BTreeMap<String, String>,

    /// Partitions in ascending ID order.
    pub partitions: Vec<PartitionInfo>,

    /// Version of the assignment document.
    pub version: i32,
}

/// A single partition of a topic.
///
/// `leader`, `isr`, and the epochs are only populated when partition state
/// was requested (or when the record comes from a broker metadata reply);
/// otherwise they are zero/empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionInfo {
    /// The topic this partition belongs to.
    pub topic: String,

    /// The partition ID.
    pub id: i32,

    /// Broker ID of the current leader.
    pub leader: i32,

    /// Version of the partition state document.
    pub version: i32,

    /// Assigned replicas. Index 0 is the preferred leader.
    pub replicas: Vec<i32>,

    /// In-sync replicas. Order is not meaningful.
    pub isr: Vec<i32>,

    /// Epoch of the controller that last updated the state.
    pub controller_epoch: i32,

    /// Leader epoch of the partition.
    pub leader_epoch: i32,
}

/// A broker as registered in the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    /// The broker ID.
    pub id: i32,

    /// Advertised hostname.
    pub host: String,

    /// Advertised port.
    pub port: i32,

    /// Rack, if the broker registered one.
    pub rack: Option<String>,

    /// Registration time. The Unix epoch if the broker did not record one.
    pub timestamp: DateTime<Utc>,

    /// Broker-level config overrides. `None` if the broker has no config
    /// document.
    pub config: Option<BTreeMap<String, String>>,
}

/// The replica placement for one partition, as used by reassignment and
/// partition addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    /// The partition ID.
    pub id: i32,

    /// Broker IDs that should hold replicas. Index 0 is the preferred
    /// leader.
    pub replicas: Vec<i32>,
}

/// Parameters for creating a topic via the brokers.
#[derive(Debug, Clone, Default)]
pub struct TopicCreation {
    /// The topic name.
    pub name: String,

    /// Number of partitions. Ignored if `replica_assignments` is non-empty.
    pub num_partitions: i32,

    /// Replication factor. Ignored if `replica_assignments` is non-empty.
    pub replication_factor: i16,

    /// Explicit replica placement, if the caller wants to pick brokers
    /// itself.
    pub replica_assignments: Vec<PartitionAssignment>,

    /// Topic config overrides to apply at creation time.
    pub configs: BTreeMap<String, String>,
}

impl TopicCreation {
    /// Creation parameters with broker-chosen placement.
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
            ..Default::default()
        }
    }
}

/// One requested config change. An empty value requests deletion of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// The config key.
    pub name: String,

    /// The new value, or empty to delete the key.
    pub value: String,
}

impl ConfigEntry {
    /// An entry that sets `name` to `value`.
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// An entry that deletes `name`.
    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
        }
    }
}

/// A config-bearing entity: a topic or a broker.
///
/// Change notices and broker-side config queries both address entities this
/// way; the `topics/<name>` / `brokers/<id>` string form is produced only at
/// the serialization boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEntity {
    /// A topic, by name.
    Topic(String),

    /// A broker, by ID.
    Broker(i32),
}

impl ConfigEntity {
    /// The `entity_path` used in change-notice documents.
    pub fn entity_path(&self) -> String {
        match self {
            Self::Topic(name) => format!("topics/{name}"),
            Self::Broker(id) => format!("brokers/{id}"),
        }
    }

    /// The resource type code used by the broker's DescribeConfigs API.
    pub(crate) fn resource_type(&self) -> i8 {
        match self {
            Self::Topic(_) => 2,
            Self::Broker(_) => 4,
        }
    }

    /// The resource name used by the broker's DescribeConfigs API.
    pub(crate) fn resource_name(&self) -> String {
        match self {
            Self::Topic(name) => name.clone(),
            Self::Broker(id) => id.to_string(),
        }
    }
}
