//! Leadership-change notifications
//!
//! The engine reports every leadership transition (`true` on acquiring
//! leadership, `false` on losing it) through a `LeadershipNotifier`. Sends
//! never block: a slow or absent reader must not stall the engine.
//!
//! When the queue is full the newest transition is parked in a one-slot
//! overflow instead of being dropped. A further transition while something is
//! parked cancels it out (leadership flapped and came back), so once the reader
//! drains everything the last value it saw is the engine's current state.
//! Readers start from "not leader".

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Create a bounded leadership channel. A capacity of 0 is raised to 1.
pub fn leadership_channel(capacity: usize) -> (LeadershipNotifier, LeadershipEvents) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let slot = Arc::new(Mutex::new(Slot::default()));
    (
        LeadershipNotifier {
            tx,
            slot: slot.clone(),
        },
        LeadershipEvents { rx, slot },
    )
}

/// State shared by both halves. Queue order is: channel contents, then
/// `overflow`.
#[derive(Debug, Default)]
struct Slot {
    /// State the reader ends on after draining everything reported so far
    latest: bool,
    /// Newest transition that did not fit in the channel
    overflow: Option<bool>,
}

/// Sending half, owned by the engine
#[derive(Clone, Debug)]
pub struct LeadershipNotifier {
    tx: mpsc::Sender<bool>,
    slot: Arc<Mutex<Slot>>,
}

impl LeadershipNotifier {
    /// Report the current leadership state.
    ///
    /// Returns `true` if the transition was accepted, either queued or folded
    /// into the overflow slot. Repeats of the latest reported state and sends
    /// on a closed channel return `false`.
    pub fn notify(&self, is_leader: bool) -> bool {
        let mut slot = self.slot.lock();
        if slot.latest == is_leader {
            return false;
        }
        if self.tx.is_closed() {
            debug!(is_leader, "Leadership channel closed, dropping notification");
            return false;
        }

        // Nothing may overtake a parked transition
        if let Some(parked) = slot.overflow.take() {
            debug_assert_ne!(parked, is_leader);
            slot.latest = is_leader;
            debug!(is_leader, "Leadership flapped while reader was behind");
            return true;
        }

        match self.tx.try_send(is_leader) {
            Ok(()) => {
                slot.latest = is_leader;
                debug!(is_leader, "Leadership change delivered");
                true
            }
            Err(TrySendError::Full(_)) => {
                slot.latest = is_leader;
                slot.overflow = Some(is_leader);
                warn!(is_leader, "Leadership channel full, parking notification");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(is_leader, "Leadership channel closed, dropping notification");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, drained by the node for the engine's lifetime
#[derive(Debug)]
pub struct LeadershipEvents {
    rx: mpsc::Receiver<bool>,
    slot: Arc<Mutex<Slot>>,
}

impl LeadershipEvents {
    /// Wait for the next transition. Returns `None` once every notifier is gone
    /// and nothing is left to read.
    pub async fn recv(&mut self) -> Option<bool> {
        if let Some(is_leader) = self.try_recv() {
            return Some(is_leader);
        }
        // The channel was empty, so nothing can be parked until it fills
        // again, and anything sent from here on arrives through it.
        self.rx.recv().await
    }

    /// Take a queued transition without waiting
    pub fn try_recv(&mut self) -> Option<bool> {
        let mut slot = self.slot.lock();
        match self.rx.try_recv() {
            Ok(is_leader) => Some(is_leader),
            Err(_) => slot.overflow.take(),
        }
    }
}
