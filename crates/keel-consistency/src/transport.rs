//! Network transport seam
//!
//! The wire protocol belongs to the transport implementation. Assembly only
//! needs to hand the transport to the engine and to know the address the
//! local node is reachable at.

use std::fmt::Debug;

/// Bidirectional RPC channel between nodes, addressed by peer address strings
pub trait Transport: Send + Sync + Debug {
    /// Address this node advertises to its peers
    fn local_addr(&self) -> String;
}
