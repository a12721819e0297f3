//! Admin client facade.
//!
//! [`AdminClient`] composes the two sub-clients — the coordination service
//! (authoritative for intended placement and configs) and the brokers
//! (authoritative for live placement) — behind one surface. The read side
//! reconciles both views; the mutation side lives in [`alter`](self::alter)
//! and is gated by read-only mode.
//!
//! Cancellation is cooperative: every operation is an async fn that may be
//! dropped or wrapped in `tokio::time::timeout` at any await point. The
//! client holds no mutable state beyond the two shared transports, so an
//! abandoned operation leaves nothing to clean up in-process.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::broker::BrokerAdmin;
use crate::types::{BrokerInfo, ConfigEntity, PartitionInfo, TopicInfo};
use crate::zk::{znode, Error as ZkError, Lock, Transport, ZkClient, ZooKeeperTransport};

mod alter;
pub mod error;

pub use error::{Error, Result};

/// Builder for [`AdminClient`].
pub struct ClientBuilder {
    zk_addrs: Vec<String>,
    zk_prefix: String,
    bootstrap_addrs: Vec<String>,
    expected_cluster_id: Option<String>,
    read_only: bool,
    zk_transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// A builder with the coordination service endpoints, which every
    /// deployment needs.
    pub fn new(zk_addrs: Vec<String>) -> Self {
        Self {
            zk_addrs,
            zk_prefix: String::new(),
            bootstrap_addrs: Vec::new(),
            expected_cluster_id: None,
            read_only: false,
            zk_transport: None,
        }
    }

    /// Cluster path prefix, with or without the leading slash. Empty means
    /// the cluster lives at the root.
    pub fn zk_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.zk_prefix = prefix.into();
        self
    }

    /// Broker bootstrap endpoints. Required only if broker operations
    /// (topic creation, broker-side metadata) are used.
    pub fn bootstrap_addrs(mut self, addrs: Vec<String>) -> Self {
        self.bootstrap_addrs = addrs;
        self
    }

    /// Fail construction unless the cluster's recorded ID matches.
    pub fn expected_cluster_id(mut self, id: impl Into<String>) -> Self {
        self.expected_cluster_id = Some(id.into());
        self
    }

    /// Reject every mutation with [`Error::ReadOnly`] before any I/O.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Use the given coordination transport instead of connecting to
    /// ZooKeeper. Used by tests and embedded tooling.
    pub fn zk_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.zk_transport = Some(transport);
        self
    }

    /// Build [`AdminClient`], connecting to the coordination service and
    /// verifying the cluster ID if one was pinned. Broker connections are
    /// made lazily on first use.
    pub async fn build(self) -> Result<AdminClient> {
        let transport: Arc<dyn Transport> = match self.zk_transport {
            Some(transport) => transport,
            None => Arc::new(
                ZooKeeperTransport::connect(&self.zk_addrs)
                    .await
                    .map_err(Error::Coordination)?,
            ),
        };
        let zk = ZkClient::new(transport, &self.zk_prefix).map_err(Error::Coordination)?;
        let client = AdminClient {
            zk,
            brokers: BrokerAdmin::new(self.bootstrap_addrs),
            read_only: self.read_only,
        };

        if let Some(expected) = self.expected_cluster_id {
            let actual = client.get_cluster_id().await?;
            if actual != expected {
                return Err(Error::ClusterIdMismatch { expected, actual });
            }
            debug!(cluster_id = actual.as_str(), "cluster id pinned");
        }
        Ok(client)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder").finish_non_exhaustive()
    }
}

/// Kafka cluster administration client.
#[derive(Debug)]
pub struct AdminClient {
    zk: ZkClient,
    brokers: BrokerAdmin,
    read_only: bool,
}

impl AdminClient {
    /// Shorthand for [`ClientBuilder::new`].
    pub fn builder(zk_addrs: Vec<String>) -> ClientBuilder {
        ClientBuilder::new(zk_addrs)
    }

    /// The typed coordination sub-client, for callers that need raw access
    /// to the cluster's documents.
    pub fn zk(&self) -> &ZkClient {
        &self.zk
    }

    /// Whether this client refuses mutations.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// The cluster's recorded ID.
    pub async fn get_cluster_id(&self) -> Result<String> {
        let (document, _) = self.zk.get_json::<znode::ClusterId>(znode::CLUSTER_ID).await?;
        Ok(document.id)
    }

    /// Topics as recorded in the coordination service, in the sorted order
    /// of its listing (or in the order of the given names).
    ///
    /// With `include_state`, each partition's controller-owned state
    /// (leader, ISR, epochs) is merged in.
    pub async fn get_topics(
        &self,
        names: Option<&[String]>,
        include_state: bool,
    ) -> Result<Vec<TopicInfo>> {
        let names: Vec<String> = match names {
            Some(names) => names.to_vec(),
            None => self.zk.children(znode::TOPICS).await?,
        };
        let mut topics = Vec::with_capacity(names.len());
        for name in &names {
            topics.push(self.read_topic(name, include_state).await?);
        }
        Ok(topics)
    }

    /// A single topic; fails with a not-found coordination error if it does
    /// not exist.
    pub async fn get_topic(&self, name: &str, include_state: bool) -> Result<TopicInfo> {
        self.read_topic(name, include_state).await
    }

    async fn read_topic(&self, name: &str, include_state: bool) -> Result<TopicInfo> {
        let (assignment, _) = self
            .zk
            .get_json::<znode::TopicAssignment>(&znode::topic(name))
            .await?;
        let config = match self
            .zk
            .get_json::<znode::EntityConfig>(&znode::topic_config(name))
            .await
        {
            Ok((document, _)) => document.config,
            Err(ZkError::NotFound { .. }) => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        let sorted = assignment
            .sorted_partitions()
            .map_err(Error::InvalidResponse)?;
        let partitions = if include_state {
            try_join_all(
                sorted
                    .into_iter()
                    .map(|(id, replicas)| self.read_partition(name, id, replicas)),
            )
            .await?
        } else {
            sorted
                .into_iter()
                .map(|(id, replicas)| PartitionInfo {
                    topic: name.to_string(),
                    id,
                    replicas,
                    ..Default::default()
                })
                .collect()
        };
        Ok(TopicInfo {
            name: name.to_string(),
            config,
            partitions,
            version: assignment.version,
        })
    }

    async fn read_partition(
        &self,
        topic: &str,
        id: i32,
        replicas: Vec<i32>,
    ) -> Result<PartitionInfo> {
        let (state, _) = self
            .zk
            .get_json::<znode::PartitionState>(&znode::partition_state(topic, id))
            .await?;
        Ok(PartitionInfo {
            topic: topic.to_string(),
            id,
            leader: state.leader,
            version: state.version,
            replicas,
            isr: state.isr,
            controller_epoch: state.controller_epoch,
            leader_epoch: state.leader_epoch,
        })
    }

    /// Registered broker IDs, ascending.
    pub async fn get_broker_ids(&self) -> Result<Vec<i32>> {
        let children = self.zk.children(znode::BROKER_IDS).await?;
        let mut ids = Vec::with_capacity(children.len());
        for name in children {
            ids.push(name.parse().map_err(|_| {
                Error::InvalidResponse(format!("broker id {name:?} is not numeric"))
            })?);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Registered brokers in ascending ID order, with their config
    /// documents where present.
    pub async fn get_brokers(&self, ids: Option<&[i32]>) -> Result<Vec<BrokerInfo>> {
        let ids: Vec<i32> = match ids {
            Some(ids) => {
                let mut ids = ids.to_vec();
                ids.sort_unstable();
                ids
            }
            None => self.get_broker_ids().await?,
        };
        let mut brokers = Vec::with_capacity(ids.len());
        for id in ids {
            brokers.push(self.read_broker(id).await?);
        }
        Ok(brokers)
    }

    async fn read_broker(&self, id: i32) -> Result<BrokerInfo> {
        let (registration, _) = self
            .zk
            .get_json::<znode::BrokerRegistration>(&znode::broker(id))
            .await?;
        let config = match self
            .zk
            .get_json::<znode::EntityConfig>(&znode::broker_config(id))
            .await
        {
            Ok((document, _)) => Some(document.config),
            Err(ZkError::NotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        let timestamp = registration.registered_at();
        Ok(BrokerInfo {
            id,
            host: registration.host,
            port: registration.port,
            rack: registration.rack,
            timestamp,
            config,
        })
    }

    /// The brokers' live view of the given topics, flattened per partition.
    /// Replica/ISR ordering may differ from the coordination documents.
    pub async fn get_broker_partitions(&self, topics: &[String]) -> Result<Vec<PartitionInfo>> {
        Ok(self.brokers.topic_partitions(topics).await?)
    }

    /// The live config of a topic or broker as the brokers report it.
    pub async fn describe_configs(
        &self,
        entity: &ConfigEntity,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self.brokers.describe_configs(entity).await?)
    }

    /// Acquire the advisory lock at `path`, blocking until held.
    pub async fn acquire_lock(&self, path: &str) -> Result<Lock> {
        Ok(self.zk.acquire_lock(path).await?)
    }

    /// Whether any client holds (or waits on) the advisory lock at `path`.
    pub async fn lock_held(&self, path: &str) -> Result<bool> {
        Ok(self.zk.lock_held(path).await?)
    }
}
