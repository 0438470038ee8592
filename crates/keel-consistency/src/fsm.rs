//! Finite-state-machine seam
//!
//! How committed entries change the database is opaque to this crate; the
//! engine drives the state machine through this trait.

use crate::log_store::LogEntry;

/// Application state machine replicated by the engine
pub trait StateMachine: Send + Sync {
    /// Apply a committed log entry and return the application response
    fn apply(&self, entry: &LogEntry) -> anyhow::Result<Vec<u8>>;

    /// Serialize the current state for a snapshot
    fn snapshot(&self) -> anyhow::Result<Vec<u8>>;

    /// Replace the current state with the contents of a snapshot
    fn restore(&self, data: &[u8]) -> anyhow::Result<()>;
}
