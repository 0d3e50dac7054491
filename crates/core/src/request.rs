//! Local proposal requests from the block producer.

use crate::core::{Core, State};
use crate::errors::ConsensusError;
use istanbul_types::Proposal;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Mutex;
use tracing::{debug, trace};

struct PendingRequest(Proposal);

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.0.number == other.0.number
    }
}

impl Eq for PendingRequest {}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.number.cmp(&other.0.number)
    }
}

/// Proposals from the local producer that arrived ahead of their sequence,
/// ordered by block number. Mutex-guarded: the producer side feeds it while
/// the event loop drains it.
#[derive(Default)]
pub(crate) struct PendingRequests {
    heap: Mutex<BinaryHeap<Reverse<PendingRequest>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, proposal: Proposal) {
        let mut heap = self.heap.lock().expect("pending requests lock");
        heap.push(Reverse(PendingRequest(proposal)));
    }

    /// Pull every stored proposal for `sequence`, discarding stale ones.
    fn take_ready(&self, sequence: u64) -> Vec<Proposal> {
        let mut heap = self.heap.lock().expect("pending requests lock");
        let mut ready = Vec::new();
        while let Some(Reverse(head)) = heap.peek() {
            if head.0.number > sequence {
                break;
            }
            let Reverse(PendingRequest(proposal)) = heap.pop().expect("peeked entry");
            if proposal.number < sequence {
                trace!(number = proposal.number, sequence, "Dropping stale request");
                continue;
            }
            ready.push(proposal);
        }
        ready
    }
}

impl Core {
    /// A proposal arrived from the local producer. Requests ahead of the
    /// current sequence wait in the pending queue; stale ones are dropped.
    pub(crate) fn handle_request_event(&mut self, proposal: Proposal) -> Result<(), ConsensusError> {
        let sequence = self.current_view().sequence;
        if proposal.number < sequence {
            return Err(ConsensusError::OldMessage);
        }
        if proposal.number > sequence {
            self.pending_requests.push(proposal);
            return Err(ConsensusError::FutureMessage);
        }
        self.handle_request(proposal)
    }

    fn handle_request(&mut self, proposal: Proposal) -> Result<(), ConsensusError> {
        debug!(number = proposal.number, hash = ?proposal.hash(), "Handling proposal request");
        self.current_mut().set_pending_request(proposal.clone());

        if self.state == State::AcceptRequest && self.is_proposer() {
            let round = self.current_view().round;
            if round == 0 {
                self.send_preprepare(proposal, Default::default());
            } else {
                // A NEW-ROUND pre-prepare needs the certificate, and must
                // prefer a proposal inherited from prepared certificates.
                match self.preprepare_for_new_round(round) {
                    Ok((inherited, certificate)) => {
                        let proposal = inherited.unwrap_or(proposal);
                        self.send_preprepare(proposal, certificate);
                    }
                    Err(err) => {
                        debug!(%err, round, "Cannot pre-prepare for the current round yet");
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain requests that have become current. Runs whenever the core
    /// enters `AcceptRequest`.
    pub(crate) fn process_pending_requests(&mut self) {
        let sequence = self.current_view().sequence;
        for proposal in self.pending_requests.take_ready(sequence) {
            if let Err(err) = self.handle_request(proposal) {
                trace!(%err, "Pending request dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istanbul_types::Hash;

    fn proposal(number: u64) -> Proposal {
        Proposal::new(number, Hash::ZERO, 0, vec![])
    }

    #[test]
    fn take_ready_returns_matches_and_drops_stale() {
        let pending = PendingRequests::new();
        pending.push(proposal(1));
        pending.push(proposal(3));
        pending.push(proposal(5));

        let ready = pending.take_ready(3);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].number, 3);

        // The future request is still queued.
        let later = pending.take_ready(5);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].number, 5);
    }

    #[test]
    fn take_ready_is_empty_when_nothing_matches() {
        let pending = PendingRequests::new();
        pending.push(proposal(7));
        assert!(pending.take_ready(3).is_empty());
    }
}
