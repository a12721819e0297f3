use thiserror::Error;

/// Admin-level error taxonomy.
///
/// The client performs no retries: lost compare-and-set races surface as
/// [`crate::zk::Error::BadVersion`] through the `Coordination` variant and
/// the caller decides between retry and abort. Validation failures are
/// detected before any I/O.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Coordination(#[from] crate::zk::Error),

    #[error(transparent)]
    Broker(#[from] crate::broker::Error),

    #[error("cluster id mismatch: expected {expected:?}, cluster reports {actual:?}")]
    ClusterIdMismatch { expected: String, actual: String },

    #[error("client is read-only")]
    ReadOnly,

    #[error("operation already in progress: {path} exists")]
    AlreadyRunning { path: String },

    #[error("partition {partition} of topic {topic:?} already exists")]
    PartitionExists { topic: String, partition: i32 },

    #[error("replica width mismatch for topic {topic:?}: expected {expected}, got {actual}")]
    ReplicaWidthMismatch {
        topic: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid cluster state: {0}")]
    InvalidResponse(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
