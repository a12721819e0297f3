//! Znode layout and persisted document shapes.
//!
//! Every document the admin layer reads or writes lives at a fixed path
//! under the optional cluster prefix and has a rigid JSON shape: fields
//! written are exactly the ones declared here, unknown fields are ignored on
//! read. The controller and the brokers read these same documents, so the
//! shapes are bit-stable.
//!
//! Paths owned by this client (writes): `/admin/*`, `/config/topics/*`,
//! `/config/brokers/*`, `/config/changes/*`, and `/brokers/topics/<name>`
//! (creation and partition addition only). Everything else is read-only
//! here; partition `state` nodes in particular are owned by the controller.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ConfigEntity;

/// `/cluster/id`, created at cluster bootstrap.
pub const CLUSTER_ID: &str = "/cluster/id";

/// Parent of per-broker registration nodes.
pub const BROKER_IDS: &str = "/brokers/ids";

/// Parent of per-topic assignment nodes.
pub const TOPICS: &str = "/brokers/topics";

/// Parent of per-topic config nodes.
pub const CONFIG_TOPICS: &str = "/config/topics";

/// Parent of per-broker config nodes.
pub const CONFIG_BROKERS: &str = "/config/brokers";

/// Parent of sequential change notices consumed by the controller.
pub const CONFIG_CHANGES: &str = "/config/changes";

/// Parent of the control documents below.
pub const ADMIN: &str = "/admin";

/// Reassignment control document; exists while a reassignment is running.
pub const REASSIGN_PARTITIONS: &str = "/admin/reassign_partitions";

/// Election control document; exists while an election is running.
pub const PREFERRED_REPLICA_ELECTION: &str = "/admin/preferred_replica_election";

/// Sequential-node prefix for change notices. The coordination service
/// appends the 10-digit suffix; it is never fabricated client-side.
pub const CHANGE_NOTICE_PREFIX: &str = "/config/changes/config_change_";

/// Version written into documents this client creates from scratch.
pub const DOCUMENT_VERSION: i32 = 1;

/// Version of the change-notification protocol, not of any document.
pub const CHANGE_NOTICE_VERSION: i32 = 2;

pub fn broker(id: i32) -> String {
    format!("{BROKER_IDS}/{id}")
}

pub fn broker_config(id: i32) -> String {
    format!("{CONFIG_BROKERS}/{id}")
}

pub fn topic(name: &str) -> String {
    format!("{TOPICS}/{name}")
}

pub fn topic_config(name: &str) -> String {
    format!("{CONFIG_TOPICS}/{name}")
}

pub fn partition_state(topic: &str, partition: i32) -> String {
    format!("{TOPICS}/{topic}/partitions/{partition}/state")
}

/// `/cluster/id` document. Note the string-typed version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterId {
    pub version: String,
    pub id: String,
}

/// Per-broker registration document, owned by the broker itself (ephemeral).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerRegistration {
    pub host: String,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
    /// Milliseconds since the epoch, as a decimal string.
    #[serde(default)]
    pub timestamp: String,
}

impl BrokerRegistration {
    /// The registration time; the Unix epoch if absent or unparsable.
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.timestamp
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Config document for a topic or a broker.
///
/// The `version` field is preserved across rewrites exactly as read; the
/// cluster seeds some documents at 0 and others at 1 and never normalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub version: i32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl EntityConfig {
    /// An empty document, as written on the first update of an entity.
    pub fn new() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            config: BTreeMap::new(),
        }
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Replica assignment document for one topic. Partition IDs are the map
/// keys, as decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub version: i32,
    #[serde(default)]
    pub partitions: BTreeMap<String, Vec<i32>>,
}

impl TopicAssignment {
    /// Partitions in ascending numeric ID order.
    pub fn sorted_partitions(&self) -> Result<Vec<(i32, Vec<i32>)>, String> {
        let mut out = Vec::with_capacity(self.partitions.len());
        for (id, replicas) in &self.partitions {
            let id: i32 = id
                .parse()
                .map_err(|_| format!("partition id {id:?} is not numeric"))?;
            out.push((id, replicas.clone()));
        }
        out.sort_unstable_by_key(|(id, _)| *id);
        Ok(out)
    }
}

/// Partition state document, owned by the controller. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionState {
    pub leader: i32,
    pub version: i32,
    #[serde(default)]
    pub isr: Vec<i32>,
    pub controller_epoch: i32,
    pub leader_epoch: i32,
}

/// `/admin/reassign_partitions` document. The controller consumes and
/// deletes it when the reassignment finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reassignment {
    pub version: i32,
    pub partitions: Vec<ReassignmentPartition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignmentPartition {
    pub topic: String,
    pub partition: i32,
    pub replicas: Vec<i32>,
}

/// `/admin/preferred_replica_election` document. Consumed like
/// [`Reassignment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    pub version: i32,
    pub partitions: Vec<ElectionPartition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionPartition {
    pub topic: String,
    pub partition: i32,
}

/// Sequential change notice that wakes the controller after a config write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub entity_path: String,
    pub version: i32,
}

impl ChangeNotice {
    pub fn for_entity(entity: &ConfigEntity) -> Self {
        Self {
            entity_path: entity.entity_path(),
            version: CHANGE_NOTICE_VERSION,
        }
    }
}
