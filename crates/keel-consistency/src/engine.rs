// Raft engine assembly
// Wires configuration, storage, peers and transport into a running engine

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, error, info};

use crate::config::{EngineConfig, EngineOptions};
use crate::error::{ConsensusError, EngineError};
use crate::fsm::StateMachine;
use crate::log_store::{LogStore, StableStore};
use crate::notify::LeadershipNotifier;
use crate::peers::PeerStore;
use crate::snapshot::{FileSnapshotStore, SnapshotStore};
use crate::transport::Transport;

/// Handle to a running consensus engine
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Whether this node currently holds leadership
    fn is_leader(&self) -> bool;

    /// Address of the current leader, if one is known
    fn leader(&self) -> Option<String>;

    /// Stop background work (elections, heartbeats, replication)
    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// Collaborators an engine is constructed from
#[derive(Clone)]
pub struct EngineParts {
    pub fsm: Arc<dyn StateMachine>,
    pub log_store: Arc<dyn LogStore>,
    pub stable_store: Arc<dyn StableStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub peers: Arc<dyn PeerStore>,
    pub transport: Arc<dyn Transport>,
}

/// Constructs and starts a consensus engine.
///
/// A successful `start` returns an engine that is already running; there is
/// no separate activation step.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    type Engine: ConsensusEngine;

    async fn start(
        &self,
        config: EngineConfig,
        parts: EngineParts,
    ) -> Result<Self::Engine, EngineError>;
}

/// Build and start the node's consensus engine.
///
/// The log store doubles as the stable store. Leadership transitions are
/// reported through `notifier` when one is given. Any error is fatal to
/// startup and nothing is retried here.
pub async fn build_engine<F, S>(
    factory: &F,
    options: EngineOptions,
    fsm: Arc<dyn StateMachine>,
    log_store: Arc<S>,
    peers: Arc<dyn PeerStore>,
    notifier: Option<LeadershipNotifier>,
) -> Result<F::Engine, ConsensusError>
where
    F: EngineFactory,
    S: LogStore + StableStore + 'static,
{
    let span = options.span.clone();

    async move {
        let config = EngineConfig::from_options(&options, notifier);

        let snapshots = FileSnapshotStore::new(&options.dir, config.retain_snapshot_count())
            .map_err(|e| {
                error!(dir = %options.dir.display(), "Failed to create snapshot store: {}", e);
                ConsensusError::StoreInit(e)
            })?;

        let parts = EngineParts {
            fsm,
            log_store: log_store.clone(),
            stable_store: log_store,
            snapshots: Arc::new(snapshots),
            peers,
            transport: options.transport.clone(),
        };

        let engine = factory.start(config, parts).await.map_err(|e| {
            error!("Failed to start raft: {}", e);
            ConsensusError::EngineInit(e)
        })?;

        info!(
            local_addr = %options.transport.local_addr(),
            single_node = options.enable_single_node,
            "Raft engine started"
        );
        Ok(engine)
    }
    .instrument(span)
    .await
}
