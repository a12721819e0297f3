//! Broker sub-client.
//!
//! The brokers are the only authority for live leader/replica/ISR placement
//! and the only way to create topics; this module wraps the handful of admin
//! APIs the client needs. Connection setup is lazy: nothing touches the
//! network until the first broker operation.

use std::collections::BTreeMap;

use kafka_protocol::messages::create_topics_request::{
    CreatableReplicaAssignment, CreatableTopic, CreateableTopicConfig,
};
use kafka_protocol::messages::describe_configs_request::DescribeConfigsResource;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{
    ApiKey, BrokerId, CreateTopicsRequest, CreateTopicsResponse, DescribeConfigsRequest,
    DescribeConfigsResponse, MetadataRequest, MetadataResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::info;

use crate::types::{ConfigEntity, PartitionInfo, TopicCreation};

mod connection;

use connection::Connection;

/// How long the controller may take to apply a CreateTopics request before
/// the broker fails it.
const CREATE_TOPICS_TIMEOUT_MS: i32 = 30_000;

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    #[error("no broker bootstrap addresses configured")]
    MissingBootstrap,

    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no mutually supported version for API key {api_key}")]
    NoVersionMatch { api_key: i16 },

    #[error("protocol codec error: {0}")]
    Protocol(String),

    #[error("invalid broker response: {0}")]
    InvalidResponse(String),

    #[error("broker error code {code}: {}", .message.as_deref().unwrap_or("(no message)"))]
    Server { code: i16, message: Option<String> },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Typed wrapper over the Kafka admin wire protocol.
pub struct BrokerAdmin {
    bootstrap: Vec<String>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl std::fmt::Debug for BrokerAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAdmin")
            .field("bootstrap", &self.bootstrap)
            .finish_non_exhaustive()
    }
}

impl BrokerAdmin {
    pub fn new(bootstrap: Vec<String>) -> Self {
        Self {
            bootstrap,
            connection: Mutex::new(None),
        }
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = &*guard {
            return Ok(Arc::clone(connection));
        }
        if self.bootstrap.is_empty() {
            return Err(Error::MissingBootstrap);
        }
        let connection = Arc::new(Connection::connect(&self.bootstrap).await?);
        info!(broker = connection.broker(), "broker connection established");
        *guard = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Create a topic. The brokers apply this asynchronously: a success here
    /// does not mean metadata (broker- or coordination-side) reflects the
    /// topic yet, so callers that read back immediately must poll.
    pub async fn create_topic(&self, creation: &TopicCreation) -> Result<()> {
        let request = creation_request(creation);
        let response: CreateTopicsResponse = self
            .connection()
            .await?
            .request(ApiKey::CreateTopicsKey, &request)
            .await?;
        let topic = exactly_one(response.topics, "CreateTopics topic result")?;
        if topic.error_code != 0 {
            return Err(Error::Server {
                code: topic.error_code,
                message: topic.error_message.map(|m| m.to_string()),
            });
        }
        info!(topic = creation.name.as_str(), "topic created");
        Ok(())
    }

    /// The brokers' own view of the given topics, flattened per partition.
    ///
    /// Replica and ISR ordering may differ from the coordination service's
    /// documents; callers comparing the two views must compare as sets.
    pub async fn topic_partitions(&self, topics: &[String]) -> Result<Vec<PartitionInfo>> {
        let request = MetadataRequest::default()
            .with_topics(Some(
                topics
                    .iter()
                    .map(|name| {
                        MetadataRequestTopic::default()
                            .with_name(Some(TopicName::from(StrBytes::from_string(name.clone()))))
                    })
                    .collect(),
            ))
            .with_allow_auto_topic_creation(false);
        let response: MetadataResponse = self
            .connection()
            .await?
            .request(ApiKey::MetadataKey, &request)
            .await?;
        partitions_from_metadata(response)
    }

    /// The live config of a topic or broker, as reported by the brokers.
    pub async fn describe_configs(
        &self,
        entity: &ConfigEntity,
    ) -> Result<BTreeMap<String, String>> {
        let resource = DescribeConfigsResource::default()
            .with_resource_type(entity.resource_type())
            .with_resource_name(StrBytes::from_string(entity.resource_name()));
        let request = DescribeConfigsRequest::default().with_resources(vec![resource]);
        let response: DescribeConfigsResponse = self
            .connection()
            .await?
            .request(ApiKey::DescribeConfigsKey, &request)
            .await?;
        configs_from_response(response)
    }
}

fn creation_request(creation: &TopicCreation) -> CreateTopicsRequest {
    let mut topic = CreatableTopic::default()
        .with_name(TopicName::from(StrBytes::from_string(creation.name.clone())))
        .with_num_partitions(creation.num_partitions)
        .with_replication_factor(creation.replication_factor);
    if !creation.replica_assignments.is_empty() {
        // Explicit placement: the broker requires the counts to be absent.
        topic.num_partitions = -1;
        topic.replication_factor = -1;
        topic.assignments = creation
            .replica_assignments
            .iter()
            .map(|assignment| {
                CreatableReplicaAssignment::default()
                    .with_partition_index(assignment.id)
                    .with_broker_ids(assignment.replicas.iter().copied().map(BrokerId).collect())
            })
            .collect();
    }
    topic.configs = creation
        .configs
        .iter()
        .map(|(name, value)| {
            CreateableTopicConfig::default()
                .with_name(StrBytes::from_string(name.clone()))
                .with_value(Some(StrBytes::from_string(value.clone())))
        })
        .collect();
    CreateTopicsRequest::default()
        .with_topics(vec![topic])
        .with_timeout_ms(CREATE_TOPICS_TIMEOUT_MS)
}

fn partitions_from_metadata(response: MetadataResponse) -> Result<Vec<PartitionInfo>> {
    let mut partitions = Vec::new();
    for topic in response.topics {
        let name = topic
            .name
            .as_ref()
            .map(|name| name.to_string())
            .ok_or_else(|| Error::InvalidResponse("metadata topic without a name".to_string()))?;
        if topic.error_code != 0 {
            return Err(Error::Server {
                code: topic.error_code,
                message: Some(format!("metadata for topic {name:?}")),
            });
        }
        for partition in topic.partitions {
            partitions.push(PartitionInfo {
                topic: name.clone(),
                id: partition.partition_index,
                leader: partition.leader_id.0,
                replicas: partition.replica_nodes.iter().map(|id| id.0).collect(),
                isr: partition.isr_nodes.iter().map(|id| id.0).collect(),
                ..Default::default()
            });
        }
    }
    partitions.sort_by(|a, b| (a.topic.as_str(), a.id).cmp(&(b.topic.as_str(), b.id)));
    Ok(partitions)
}

fn configs_from_response(response: DescribeConfigsResponse) -> Result<BTreeMap<String, String>> {
    let result = exactly_one(response.results, "DescribeConfigs result")?;
    if result.error_code != 0 {
        return Err(Error::Server {
            code: result.error_code,
            message: result.error_message.map(|m| m.to_string()),
        });
    }
    Ok(result
        .configs
        .into_iter()
        .filter_map(|entry| {
            entry
                .value
                .map(|value| (entry.name.to_string(), value.to_string()))
        })
        .collect())
}

fn exactly_one<T>(mut items: Vec<T>, what: &str) -> Result<T> {
    let item = items
        .pop()
        .ok_or_else(|| Error::InvalidResponse(format!("missing {what}")))?;
    if items.is_empty() {
        Ok(item)
    } else {
        Err(Error::InvalidResponse(format!(
            "expected exactly one {what}, got {}",
            items.len() + 1
        )))
    }
}
