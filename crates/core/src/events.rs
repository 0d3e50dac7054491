//! Events consumed by the core's loop.
//!
//! Events are **passive data**: network delivery, the local block producer,
//! and timers only enqueue them. All state mutation happens inside the one
//! task that owns the [`Core`](crate::Core), which yields sequential
//! consistency over state transitions without locks on the core state.

use istanbul_types::{Proposal, View};
use thiserror::Error;
use tokio::sync::mpsc;

/// An input to the consensus state machine.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A wire message arrived from a peer (or from this node's own
    /// broadcast loopback).
    MessageReceived { payload: Vec<u8> },

    /// The local block producer proposed a block for this node to carry
    /// through consensus.
    NewRequest { proposal: Proposal },

    /// The round-change timer set for `view` fired.
    Timeout { view: View },

    /// The backend observed the committed block as the new chain head.
    FinalCommitted,
}

/// The enqueue-only handle handed to the backend side.
///
/// Holding an `EventSender` grants no access to consensus state; it can
/// only append to the core's event queue. This is what breaks the
/// core↔backend reference cycle.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<CoreEvent>,
}

/// The core's event loop has shut down and the event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("consensus core is not running")]
pub struct CoreStopped;

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<CoreEvent>) -> Self {
        Self { tx }
    }

    /// Enqueue an event, waiting for channel capacity.
    pub async fn send(&self, event: CoreEvent) -> Result<(), CoreStopped> {
        self.tx.send(event).await.map_err(|_| CoreStopped)
    }

    /// Enqueue without waiting. For producers that must never block; a full
    /// queue drops the event, which the protocol tolerates like any lost
    /// message.
    pub fn try_send(&self, event: CoreEvent) -> Result<(), CoreStopped> {
        self.tx.try_send(event).map_err(|_| CoreStopped)
    }

    /// Enqueue an inbound wire message.
    pub async fn deliver_message(&self, payload: Vec<u8>) -> Result<(), CoreStopped> {
        self.send(CoreEvent::MessageReceived { payload }).await
    }

    /// Enqueue a locally produced proposal.
    pub async fn submit_request(&self, proposal: Proposal) -> Result<(), CoreStopped> {
        self.send(CoreEvent::NewRequest { proposal }).await
    }

    /// Notify the core that the committed block reached the chain head.
    pub async fn final_committed(&self) -> Result<(), CoreStopped> {
        self.send(CoreEvent::FinalCommitted).await
    }
}
