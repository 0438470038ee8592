//! Common test utilities for engine assembly tests
//!
//! - FakeEngineFactory: validates its configuration and hands out FakeEngine
//! - FakeEngine: records what it was built from and simulates leadership
//! - MemoryFsm / TestTransport: minimal collaborators

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use keel_consistency::{
    ConsensusEngine, EngineConfig, EngineError, EngineFactory, EngineParts, LogEntry, LogStore,
    SnapshotStore, StateMachine, Transport, is_lone_node,
};

pub const LOCAL_ADDR: &str = "10.0.0.1:9000";

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
pub struct TestTransport {
    addr: String,
}

impl TestTransport {
    pub fn new(addr: &str) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.to_string(),
        })
    }
}

impl Transport for TestTransport {
    fn local_addr(&self) -> String {
        self.addr.clone()
    }
}

/// State machine that just remembers applied commands
#[derive(Default)]
pub struct MemoryFsm {
    applied: Mutex<Vec<Vec<u8>>>,
}

impl StateMachine for MemoryFsm {
    fn apply(&self, entry: &LogEntry) -> anyhow::Result<Vec<u8>> {
        self.applied.lock().push(entry.data.clone());
        Ok(Vec::new())
    }

    fn snapshot(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&*self.applied.lock())?)
    }

    fn restore(&self, data: &[u8]) -> anyhow::Result<()> {
        *self.applied.lock() = serde_json::from_slice(data)?;
        Ok(())
    }
}

pub struct FakeEngine {
    pub config: EngineConfig,
    pub parts: EngineParts,
    leader: AtomicBool,
    running: AtomicBool,
}

impl FakeEngine {
    /// Simulate winning an election
    pub fn become_leader(&self) {
        self.leader.store(true, Ordering::SeqCst);
        if let Some(notifier) = self.config.notifier() {
            notifier.notify(true);
        }
    }

    /// Simulate stepping down
    pub fn lose_leadership(&self) {
        self.leader.store(false, Ordering::SeqCst);
        if let Some(notifier) = self.config.notifier() {
            notifier.notify(false);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsensusEngine for FakeEngine {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn leader(&self) -> Option<String> {
        self.is_leader().then(|| self.parts.transport.local_addr())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::SeqCst);
        self.lose_leadership();
        Ok(())
    }
}

/// Engine factory that behaves like a real engine at construction time
#[derive(Default)]
pub struct FakeEngineFactory {
    /// Fail `start` as if the transport could not bind
    pub fail_transport: bool,
    pub started: Mutex<u32>,
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    type Engine = FakeEngine;

    async fn start(
        &self,
        config: EngineConfig,
        parts: EngineParts,
    ) -> Result<FakeEngine, EngineError> {
        config.validate()?;
        if self.fail_transport {
            return Err(EngineError::Transport("address already in use".to_string()));
        }

        // Make sure the storage handed over is usable
        parts.log_store.last_index()?;
        parts.snapshots.list()?;

        let engine = FakeEngine {
            config,
            parts,
            leader: AtomicBool::new(false),
            running: AtomicBool::new(true),
        };
        *self.started.lock() += 1;

        // A lone node allowed to run alone elects itself right away. An
        // unreadable registry is treated as "not lone".
        let local_addr = engine.parts.transport.local_addr();
        if engine.config.enable_single_node()
            && is_lone_node(engine.parts.peers.as_ref(), &local_addr).unwrap_or(false)
        {
            engine.become_leader();
        }

        Ok(engine)
    }
}
