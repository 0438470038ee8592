//! Keel Consistency - Raft engine assembly for a replicated database node
//!
//! This crate provides:
//! - Opinionated engine configuration built from a few timing knobs
//! - A directory-backed snapshot store with bounded retention
//! - A RocksDB log store that doubles as the engine's stable store
//! - Engine assembly behind an injected `EngineFactory`
//! - Leadership-change notifications that never block the engine
//! - The lone-node check that gates single-node bootstrap
//!
//! Leader election, log replication and snapshot compaction are the engine's
//! job and are not implemented here.

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod log_store;
pub mod notify;
pub mod peers;
pub mod snapshot;
pub mod transport;

// Re-export commonly used types
pub use bootstrap::is_lone_node;
pub use config::{EngineConfig, EngineOptions, EngineSettings};
pub use engine::{ConsensusEngine, EngineFactory, EngineParts, build_engine};
pub use error::{ConsensusError, EngineError, StoreError};
pub use fsm::StateMachine;
pub use log_store::{LogEntry, LogKind, LogStore, RocksLogStore, StableStore};
pub use notify::{LeadershipEvents, LeadershipNotifier, leadership_channel};
pub use peers::{JsonPeerStore, PeerStore, StaticPeers};
pub use snapshot::{FileSnapshotStore, SnapshotMeta, SnapshotSink, SnapshotStore};
pub use transport::Transport;
