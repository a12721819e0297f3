//! Typed coordination sub-client.
//!
//! [`ZkClient`] wraps a [`Transport`] with the conventions every caller in
//! this crate relies on: the optional cluster prefix is prepended
//! transparently, paths must be absolute, documents are JSON, and child
//! listings come back sorted. It adds nothing else — no retries, no
//! caching — so transport errors (including lost compare-and-set races)
//! surface unchanged.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

mod lock;
#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;
mod transport;
pub mod znode;

pub use lock::Lock;
#[cfg(any(test, feature = "test-utilities"))]
pub use memory::MemoryTransport;
pub use transport::{CreateMode, Error, Result, Transport, ZooKeeperTransport};

/// Typed wrapper over the coordination service.
#[derive(Debug, Clone)]
pub struct ZkClient {
    transport: Arc<dyn Transport>,
    /// Either empty or `/<cluster-name>`, normalized.
    prefix: String,
}

impl ZkClient {
    pub fn new(transport: Arc<dyn Transport>, prefix: &str) -> Result<Self> {
        Ok(Self {
            transport,
            prefix: normalize_prefix(prefix)?,
        })
    }

    /// The resolved (prefixed) form of a caller path.
    fn resolve(&self, path: &str) -> Result<String> {
        if !path.starts_with('/') {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "must be absolute",
            });
        }
        if self.prefix.is_empty() {
            Ok(path.to_string())
        } else if path == "/" {
            Ok(self.prefix.clone())
        } else {
            Ok(format!("{}{}", self.prefix, path))
        }
    }

    /// Strip the prefix from a transport-returned path, back into caller
    /// space.
    fn relative(&self, full: &str) -> String {
        if self.prefix.is_empty() {
            full.to_string()
        } else {
            full.strip_prefix(&self.prefix).unwrap_or(full).to_string()
        }
    }

    pub async fn get(&self, path: &str) -> Result<(Vec<u8>, i32)> {
        self.transport.get(&self.resolve(path)?).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<(T, i32)> {
        let (data, version) = self.get(path).await?;
        let value = serde_json::from_slice(&data).map_err(|source| Error::Json {
            path: path.to_string(),
            source,
        })?;
        Ok((value, version))
    }

    /// Compare-and-set write of a JSON document.
    pub async fn set_json<T: Serialize>(
        &self,
        path: &str,
        value: &T,
        expected_version: i32,
    ) -> Result<()> {
        let data = encode(path, value)?;
        self.transport
            .set(&self.resolve(path)?, &data, expected_version)
            .await
    }

    /// Create a node, returning the created path (with any sequential
    /// suffix) in caller space.
    pub async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let created = self.transport.create(&self.resolve(path)?, data, mode).await?;
        Ok(self.relative(&created))
    }

    pub async fn create_json<T: Serialize>(
        &self,
        path: &str,
        value: &T,
        mode: CreateMode,
    ) -> Result<String> {
        let data = encode(path, value)?;
        self.create(path, &data, mode).await
    }

    /// Create `path` and any missing ancestors as empty persistent nodes.
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let mut current = String::new();
        for segment in resolved.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match self
                .transport
                .create(&current, b"", CreateMode::Persistent)
                .await
            {
                Ok(_) | Err(Error::NodeExists { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Child names of `path`, sorted.
    pub async fn children(&self, path: &str) -> Result<Vec<String>> {
        let mut children = self.transport.children(&self.resolve(path)?).await?;
        children.sort();
        Ok(children)
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.transport.exists(&self.resolve(path)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.transport.delete(&self.resolve(path)?).await
    }

    /// Resolve once `path` no longer exists.
    pub async fn await_deletion(&self, path: &str) -> Result<()> {
        self.transport.await_deletion(&self.resolve(path)?).await
    }
}

fn encode<T: Serialize>(path: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| Error::Json {
        path: path.to_string(),
        source,
    })
}

fn normalize_prefix(prefix: &str) -> Result<String> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.contains("//") {
        return Err(Error::InvalidPath {
            path: prefix.to_string(),
            reason: "empty path segment",
        });
    }
    Ok(format!("/{trimmed}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn client(prefix: &str) -> ZkClient {
        ZkClient::new(Arc::new(MemoryTransport::new()), prefix).unwrap()
    }

    #[tokio::test]
    async fn prefix_is_transparent() {
        let zk = client("cluster-a");
        zk.ensure_path("/brokers/ids").await.unwrap();
        zk.create("/brokers/ids/1", b"{}", CreateMode::Persistent)
            .await
            .unwrap();

        // Visible through the prefixed client...
        assert!(zk.exists("/brokers/ids/1").await.unwrap());
        // ...and stored under the prefix in the transport's tree.
        let (raw, _) = zk.transport.get("/cluster-a/brokers/ids/1").await.unwrap();
        assert_eq!(raw, b"{}");
    }

    #[tokio::test]
    async fn prefix_accepts_leading_slash() {
        let with = normalize_prefix("/cluster-a").unwrap();
        let without = normalize_prefix("cluster-a").unwrap();
        assert_eq!(with, without);
        assert_eq!(normalize_prefix("").unwrap(), "");
    }

    #[tokio::test]
    async fn relative_paths_are_rejected() {
        let zk = client("");
        let err = zk.get("brokers/ids").await.unwrap_err();
        assert_matches!(err, Error::InvalidPath { .. });
    }

    #[tokio::test]
    async fn sequential_create_returns_caller_space_path() {
        let zk = client("cluster-b");
        zk.ensure_path("/config/changes").await.unwrap();
        let created = zk
            .create(
                "/config/changes/config_change_",
                b"{}",
                CreateMode::PersistentSequential,
            )
            .await
            .unwrap();
        assert_eq!(created, "/config/changes/config_change_0000000000");
    }

    #[tokio::test]
    async fn children_are_sorted() {
        let zk = client("");
        zk.ensure_path("/topics").await.unwrap();
        for name in ["zeta", "alpha", "mid"] {
            zk.create(&format!("/topics/{name}"), b"", CreateMode::Persistent)
                .await
                .unwrap();
        }
        assert_eq!(zk.children("/topics").await.unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn json_round_trip_with_version() {
        let zk = client("");
        zk.ensure_path("/config/topics").await.unwrap();
        zk.create_json(
            "/config/topics/t",
            &json!({"version": 1, "config": {"k": "v"}}),
            CreateMode::Persistent,
        )
        .await
        .unwrap();

        let (doc, version) = zk
            .get_json::<znode::EntityConfig>("/config/topics/t")
            .await
            .unwrap();
        assert_eq!(version, 0);
        assert_eq!(doc.config.get("k").map(String::as_str), Some("v"));

        zk.set_json("/config/topics/t", &doc, version).await.unwrap();
        let err = zk.set_json("/config/topics/t", &doc, version).await.unwrap_err();
        assert_matches!(err, Error::BadVersion { .. });
    }

    #[tokio::test]
    async fn malformed_document_is_a_json_error() {
        let zk = client("");
        zk.create("/doc", b"not json", CreateMode::Persistent)
            .await
            .unwrap();
        let err = zk.get_json::<znode::EntityConfig>("/doc").await.unwrap_err();
        assert_matches!(err, Error::Json { .. });
    }
}
