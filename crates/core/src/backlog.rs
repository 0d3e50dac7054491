//! Out-of-order message buffering.
//!
//! Messages with future views are parked here per sender and replayed
//! through normal dispatch after every state transition. Within one sender
//! replay is in view order, so the core sees each peer's messages in the
//! order the protocol produced them.

use istanbul_messages::{Message, MsgCode};
use istanbul_types::{Address, View};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use tracing::{trace, warn};

/// Cap on parked messages per sender. A peer that is genuinely ahead only
/// needs a handful of views buffered; anything more is noise or abuse.
const MAX_PER_SENDER: usize = 128;

/// Replay order within a view: the PRE-PREPARE must be handled before the
/// votes on it, and COMMITs count toward the prepared quorum, so they go
/// before PREPAREs.
fn code_priority(code: MsgCode) -> u8 {
    match code {
        MsgCode::Preprepare => 1,
        MsgCode::Commit => 2,
        MsgCode::Prepare => 3,
        MsgCode::RoundChange => 4,
    }
}

#[derive(Debug)]
struct Entry {
    view: View,
    priority: u8,
    message: Message,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.view == other.view && self.priority == other.priority
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.view, self.priority).cmp(&(other.view, other.priority))
    }
}

/// Per-sender priority queues of future-view messages.
///
/// The map is mutex-guarded: it sits at the core boundary, where delivery
/// may feed it while a drain is collecting.
#[derive(Debug, Default)]
pub(crate) struct Backlog {
    queues: Mutex<HashMap<Address, BinaryHeap<Reverse<Entry>>>>,
}

impl Backlog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a future message. The node's own loopback messages are not
    /// buffered; they are only meaningful at the view that produced them.
    pub(crate) fn store(&self, own_address: Address, view: View, message: Message) {
        if message.address == own_address {
            return;
        }
        let mut queues = self.queues.lock().expect("backlog lock");
        let queue = queues.entry(message.address).or_default();
        if queue.len() >= MAX_PER_SENDER {
            warn!(
                sender = ?message.address,
                code = ?message.code,
                "Backlog full for sender, dropping message"
            );
            return;
        }
        trace!(sender = ?message.address, code = ?message.code, view = %view, "Message backlogged");
        queue.push(Reverse(Entry {
            view,
            priority: code_priority(message.code),
            message,
        }));
    }

    /// Pull every message whose view is no longer ahead of `current`,
    /// preserving per-sender view order. ROUND-CHANGEs compare by sequence
    /// only, mirroring dispatch.
    pub(crate) fn drain_ready(&self, current: View) -> Vec<Message> {
        let mut ready = Vec::new();
        let mut queues = self.queues.lock().expect("backlog lock");
        queues.retain(|_, queue| {
            while let Some(Reverse(head)) = queue.peek() {
                let is_future = if head.message.code == MsgCode::RoundChange {
                    head.view.sequence > current.sequence
                } else {
                    head.view > current
                };
                if is_future {
                    break;
                }
                let Reverse(entry) = queue.pop().expect("peeked entry");
                ready.push(entry.message);
            }
            !queue.is_empty()
        });
        ready
    }

    /// Drop everything below the given sequence. Called on sequence
    /// advance so queues never hold stale views.
    pub(crate) fn clear_below(&self, sequence: u64) {
        let mut queues = self.queues.lock().expect("backlog lock");
        queues.retain(|_, queue| {
            let kept: BinaryHeap<_> = queue
                .drain()
                .filter(|Reverse(e)| e.view.sequence >= sequence)
                .collect();
            *queue = kept;
            !queue.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let queues = self.queues.lock().expect("backlog lock");
        queues.values().map(|q| q.len()).sum()
    }
}
