//! Error types for engine assembly and bootstrap decisions
//!
//! - `StoreError`: failures of the durable collaborators (log, snapshot, peers)
//! - `EngineError`: failures raised while an engine is being constructed
//! - `ConsensusError`: what `build_engine` and `is_lone_node` hand back

/// Storage-level failures from the log, snapshot and peer stores
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("snapshot retain count must be at least 1, got {0}")]
    InvalidRetainCount(usize),

    #[error("snapshot '{0}' not found")]
    SnapshotNotFound(String),

    #[error("snapshot '{id}' checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },
}

/// Failures raised by an engine factory while starting an engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid openraft configuration: {0}")]
    Openraft(#[from] openraft::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced to the node startup sequence.
///
/// `StoreInit` and `EngineInit` are fatal to startup. What to do with
/// `RegistryRead` is left to the caller.
#[derive(thiserror::Error, Debug)]
pub enum ConsensusError {
    #[error("failed to create snapshot store: {0}")]
    StoreInit(#[source] StoreError),

    #[error("failed to start raft: {0}")]
    EngineInit(#[source] EngineError),

    #[error("failed to get current raft peers: {0}")]
    RegistryRead(#[source] StoreError),
}
