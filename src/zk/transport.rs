//! Transport seam for the coordination service.
//!
//! The rest of the crate only sees [`Transport`]: a hierarchical key-value
//! store with versioned compare-and-set writes, ordered sequential nodes,
//! ephemeral nodes, and deletion watches. The default implementation speaks
//! the ZooKeeper protocol; tests run against an in-memory implementation.

use async_trait::async_trait;
use thiserror::Error;
use zookeeper_client as zk;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("node not found: {path}")]
    NotFound { path: String },

    #[error("node already exists: {path}")]
    NodeExists { path: String },

    #[error("version conflict writing {path}")]
    BadVersion { path: String },

    #[error("connection to the coordination service lost")]
    ConnectionLost,

    #[error("not authorized by the coordination service")]
    Unauthorized,

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("malformed document at {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("coordination service error: {0}")]
    Server(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Node lifetime and naming mode for [`Transport::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }
}

/// Minimal coordination-service surface used by the admin client.
///
/// All paths are absolute. Errors are surfaced unchanged; implementations do
/// not retry (transparent reconnection inside a session is the
/// implementation's own business).
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Read a node's data and its current version.
    async fn get(&self, path: &str) -> Result<(Vec<u8>, i32)>;

    /// Compare-and-set write: fails with [`Error::BadVersion`] if the node's
    /// version is no longer `expected_version`.
    async fn set(&self, path: &str, data: &[u8], expected_version: i32) -> Result<()>;

    /// Create a node, returning the path actually created (for sequential
    /// modes this includes the server-assigned suffix).
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Names (not paths) of the node's children, in no particular order.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete a node regardless of its version.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Resolve once the node no longer exists. Returns immediately if it
    /// does not exist now.
    async fn await_deletion(&self, path: &str) -> Result<()>;
}

/// [`Transport`] over a ZooKeeper session.
///
/// The session closes when the last clone is dropped; ephemeral nodes owned
/// by it are then released by the server.
#[derive(Clone)]
pub struct ZooKeeperTransport {
    client: zk::Client,
}

impl ZooKeeperTransport {
    /// Connect to the given `host:port` endpoints.
    pub async fn connect(addrs: &[String]) -> Result<Self> {
        if addrs.is_empty() {
            return Err(Error::Server(
                "no coordination service endpoints given".to_string(),
            ));
        }
        let cluster = addrs.join(",");
        let client = zk::Client::connect(&cluster)
            .await
            .map_err(|err| convert(err, &cluster))?;
        Ok(Self { client })
    }
}

impl std::fmt::Debug for ZooKeeperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZooKeeperTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ZooKeeperTransport {
    async fn get(&self, path: &str) -> Result<(Vec<u8>, i32)> {
        let (data, stat) = self
            .client
            .get_data(path)
            .await
            .map_err(|err| convert(err, path))?;
        Ok((data, stat.version))
    }

    async fn set(&self, path: &str, data: &[u8], expected_version: i32) -> Result<()> {
        self.client
            .set_data(path, data, Some(expected_version))
            .await
            .map_err(|err| convert(err, path))?;
        Ok(())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let zk_mode = match mode {
            CreateMode::Persistent => zk::CreateMode::Persistent,
            CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
            CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
            CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
        };
        let options = zk_mode.with_acls(zk::Acls::anyone_all());
        let (_, sequence) = self
            .client
            .create(path, data, &options)
            .await
            .map_err(|err| convert(err, path))?;
        if mode.is_sequential() {
            Ok(format!("{}{}", path, sequence))
        } else {
            Ok(path.to_string())
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.client
            .list_children(path)
            .await
            .map_err(|err| convert(err, path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let stat = self
            .client
            .check_stat(path)
            .await
            .map_err(|err| convert(err, path))?;
        Ok(stat.is_some())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete(path, None)
            .await
            .map_err(|err| convert(err, path))
    }

    async fn await_deletion(&self, path: &str) -> Result<()> {
        loop {
            let (stat, watcher) = self
                .client
                .check_and_watch_stat(path)
                .await
                .map_err(|err| convert(err, path))?;
            if stat.is_none() {
                drop(watcher);
                return Ok(());
            }
            let event = watcher.changed().await;
            if matches!(event.event_type, zk::EventType::NodeDeleted) {
                return Ok(());
            }
            // Any other event re-arms the watch via the next loop iteration.
        }
    }
}

fn convert(err: zk::Error, path: &str) -> Error {
    match err {
        zk::Error::NoNode => Error::NotFound {
            path: path.to_string(),
        },
        zk::Error::NodeExists => Error::NodeExists {
            path: path.to_string(),
        },
        zk::Error::BadVersion => Error::BadVersion {
            path: path.to_string(),
        },
        zk::Error::ConnectionLoss | zk::Error::SessionExpired => Error::ConnectionLost,
        zk::Error::NoAuth | zk::Error::AuthFailed => Error::Unauthorized,
        other => Error::Server(other.to_string()),
    }
}
