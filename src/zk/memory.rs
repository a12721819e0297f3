//! In-memory coordination transport.
//!
//! A faithful in-process implementation of [`Transport`] for tests and
//! embedded tooling: versioned nodes with compare-and-set, per-parent
//! sequential counters with the 10-digit zero-padded suffixes the real
//! service produces, ephemeral nodes tied to a handle, and deletion watches.
//!
//! Available during unit tests or with the `test-utilities` feature:
//!
//! ```toml
//! [dev-dependencies]
//! zkafka = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::transport::{CreateMode, Error, Result, Transport};

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    version: i32,
    ephemeral_owner: Option<u64>,
    next_sequence: u64,
}

impl Node {
    fn new(data: Vec<u8>, ephemeral_owner: Option<u64>) -> Self {
        Self {
            data,
            version: 0,
            ephemeral_owner,
            next_sequence: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    nodes: BTreeMap<String, Node>,
    delete_watches: HashMap<String, Vec<oneshot::Sender<()>>>,
    next_session: u64,
}

impl Shared {
    fn fire_delete_watches(&mut self, path: &str) {
        if let Some(watches) = self.delete_watches.remove(path) {
            for tx in watches {
                let _ = tx.send(());
            }
        }
    }
}

/// In-memory [`Transport`]. Every handle acts as its own session; ephemeral
/// nodes created through a handle disappear when [`MemoryTransport::close`]
/// is called on it.
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    session: u64,
}

impl MemoryTransport {
    /// An empty tree containing only the root node.
    pub fn new() -> Self {
        let mut shared = Shared::default();
        shared.nodes.insert("/".to_string(), Node::new(Vec::new(), None));
        shared.next_session = 1;
        Self {
            shared: Arc::new(Mutex::new(shared)),
            session: 0,
        }
    }

    /// Another session over the same tree.
    pub fn handle(&self) -> Self {
        let mut shared = self.shared.lock();
        let session = shared.next_session;
        shared.next_session += 1;
        Self {
            shared: Arc::clone(&self.shared),
            session,
        }
    }

    /// End this handle's session, reaping its ephemeral nodes.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        let owned: Vec<String> = shared
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(self.session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            shared.nodes.remove(&path);
            shared.fire_delete_watches(&path);
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "must be absolute",
        });
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "must not end with a slash",
        });
    }
    Ok(())
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn child_names(nodes: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
    let prefix = if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    };
    nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .map(|(key, _)| &key[prefix.len()..])
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, path: &str) -> Result<(Vec<u8>, i32)> {
        validate(path)?;
        let shared = self.shared.lock();
        let node = shared.nodes.get(path).ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        Ok((node.data.clone(), node.version))
    }

    async fn set(&self, path: &str, data: &[u8], expected_version: i32) -> Result<()> {
        validate(path)?;
        let mut shared = self.shared.lock();
        let node = shared.nodes.get_mut(path).ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        if node.version != expected_version {
            return Err(Error::BadVersion {
                path: path.to_string(),
            });
        }
        node.data = data.to_vec();
        node.version += 1;
        Ok(())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        validate(path)?;
        if path == "/" {
            return Err(Error::NodeExists {
                path: path.to_string(),
            });
        }
        let mut shared = self.shared.lock();
        let parent = parent_of(path).to_string();
        let parent_node = shared.nodes.get_mut(&parent).ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(Error::Server(format!(
                "ephemeral node {parent} cannot have children"
            )));
        }
        let created = if mode.is_sequential() {
            let sequence = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{}{:010}", path, sequence)
        } else {
            path.to_string()
        };
        if shared.nodes.contains_key(&created) {
            return Err(Error::NodeExists { path: created });
        }
        let owner = mode.is_ephemeral().then_some(self.session);
        shared.nodes.insert(created.clone(), Node::new(data.to_vec(), owner));
        Ok(created)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        let shared = self.shared.lock();
        if !shared.nodes.contains_key(path) {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        Ok(child_names(&shared.nodes, path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        Ok(self.shared.lock().nodes.contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut shared = self.shared.lock();
        if !shared.nodes.contains_key(path) {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        if !child_names(&shared.nodes, path).is_empty() {
            return Err(Error::Server(format!("node {path} has children")));
        }
        shared.nodes.remove(path);
        shared.fire_delete_watches(path);
        Ok(())
    }

    async fn await_deletion(&self, path: &str) -> Result<()> {
        validate(path)?;
        let rx = {
            let mut shared = self.shared.lock();
            if !shared.nodes.contains_key(path) {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            shared
                .delete_watches
                .entry(path.to_string())
                .or_default()
                .push(tx);
            rx
        };
        // A dropped sender means the tree itself went away; treat the node
        // as gone either way.
        let _ = rx.await;
        Ok(())
    }
}
