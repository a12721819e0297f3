//! Ordered-ephemeral-node locks.
//!
//! The classic coordination-service recipe: each contender creates an
//! ephemeral sequential `lock-` node under the lock path and the smallest
//! sequence holds the lock. Everyone else watches only its immediate
//! predecessor, so release wakes exactly one waiter and acquisition is FIFO.
//! A holder that disconnects releases implicitly through ephemeral
//! semantics.
//!
//! Locks are advisory: nothing in the mutation engine checks them.

use tracing::debug;

use super::{CreateMode, Error, Result, ZkClient};

const LOCK_NODE_PREFIX: &str = "lock-";

impl ZkClient {
    /// Block until the lock at `path` is held, returning a handle that
    /// releases it.
    ///
    /// `path` and its ancestors are created if missing. The returned handle
    /// must be kept alive for as long as the lock is needed; dropping it
    /// without [`Lock::unlock`] leaves release to session expiry.
    pub async fn acquire_lock(&self, path: &str) -> Result<Lock> {
        self.ensure_path(path).await?;
        let node = self
            .create(
                &format!("{path}/{LOCK_NODE_PREFIX}"),
                b"",
                CreateMode::EphemeralSequential,
            )
            .await?;
        let sequence = parse_sequence(&node).ok_or_else(|| {
            Error::Server(format!("unexpected lock node name {node:?}"))
        })?;
        debug!(path, node = node.as_str(), "waiting for lock");

        loop {
            let mut contenders: Vec<(i64, String)> = self
                .children(path)
                .await?
                .into_iter()
                .filter_map(|name| parse_sequence(&name).map(|seq| (seq, name)))
                .collect();
            contenders.sort();

            match contenders.first() {
                Some((first, _)) if *first == sequence => {
                    debug!(path, node = node.as_str(), "lock acquired");
                    return Ok(Lock {
                        zk: self.clone(),
                        node,
                    });
                }
                _ => {}
            }

            // Not first in line: wait for the contender directly ahead of
            // us to go away, then re-check.
            let predecessor = contenders
                .iter()
                .rev()
                .find(|(seq, _)| *seq < sequence)
                .map(|(_, name)| name.clone())
                .ok_or_else(|| {
                    Error::Server(format!("lock node {node:?} disappeared while waiting"))
                })?;
            self.await_deletion(&format!("{path}/{predecessor}")).await?;
        }
    }

    /// Whether any client currently holds (or waits on) the lock at `path`.
    pub async fn lock_held(&self, path: &str) -> Result<bool> {
        match self.children(path).await {
            Ok(children) => Ok(!children.is_empty()),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// A held lock. Exists until [`Lock::unlock`] or session end.
#[derive(Debug)]
pub struct Lock {
    zk: ZkClient,
    node: String,
}

impl Lock {
    /// The lock's own sequential node path.
    pub fn node_path(&self) -> &str {
        &self.node
    }

    /// Release the lock by deleting its node.
    pub async fn unlock(self) -> Result<()> {
        self.zk.delete(&self.node).await
    }
}

fn parse_sequence(name: &str) -> Option<i64> {
    let start = name.rfind(LOCK_NODE_PREFIX)? + LOCK_NODE_PREFIX.len();
    let suffix = &name[start..];
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
