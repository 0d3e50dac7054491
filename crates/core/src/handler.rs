//! Event dispatch and message gating.

use crate::core::{Core, State};
use crate::errors::ConsensusError;
use crate::events::CoreEvent;
use istanbul_messages::{commit_seal_payload, Message, MsgCode, Preprepare, RoundChange, Subject};
use istanbul_types::View;
use std::sync::Arc;
use tracing::{debug, trace};

impl Core {
    /// Consume one event. Handler errors never escape: an erroring message
    /// is dropped (or backlogged, for future views) and logged.
    pub fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::MessageReceived { payload } => {
                if let Err(err) = self.handle_message(&payload) {
                    trace!(%err, "Message dropped");
                }
            }
            CoreEvent::NewRequest { proposal } => {
                if let Err(err) = self.handle_request_event(proposal) {
                    trace!(%err, "Request deferred or dropped");
                }
            }
            CoreEvent::Timeout { view } => self.handle_timeout(view),
            CoreEvent::FinalCommitted => self.handle_final_committed(),
        }
    }

    /// Decode an inbound wire payload, check its envelope signature and the
    /// sender's membership, and dispatch it.
    pub fn handle_message(&mut self, payload: &[u8]) -> Result<(), ConsensusError> {
        let backend = Arc::clone(&self.backend);
        let message = Message::from_payload(payload, |data, address, signature| {
            backend.check_signature(data, address, signature).is_ok()
        })
        .map_err(|err| {
            trace!(%err, "Rejected undecodable or unverifiable message");
            ConsensusError::InvalidMessage
        })?;

        if !self.val_set.contains(message.address) {
            debug!(sender = ?message.address, "Message from non-validator");
            return Err(ConsensusError::UnauthorizedAddress);
        }
        self.handle_checked_message(message)
    }

    /// Gate a decoded message by view, then dispatch by code. Future views
    /// go to the backlog; past views get the old-message treatment.
    pub(crate) fn handle_checked_message(&mut self, message: Message) -> Result<(), ConsensusError> {
        let view = self.message_view(&message)?;
        if let Err(err) = self.check_message(message.code, view) {
            match err {
                ConsensusError::FutureMessage => {
                    self.backlog.store(self.address, view, message);
                    return Err(ConsensusError::FutureMessage);
                }
                ConsensusError::OldMessage => {
                    self.handle_old_message(&message);
                    return Err(ConsensusError::OldMessage);
                }
                other => return Err(other),
            }
        }
        match message.code {
            MsgCode::Preprepare => self.handle_preprepare(&message),
            MsgCode::Prepare => self.handle_prepare(&message),
            MsgCode::Commit => self.handle_commit(&message),
            MsgCode::RoundChange => self.handle_round_change(&message),
        }
    }

    /// The view a message claims, decoded from its body.
    fn message_view(&self, message: &Message) -> Result<View, ConsensusError> {
        match message.code {
            MsgCode::Preprepare => message
                .decode::<Preprepare>()
                .map(|p| p.view)
                .map_err(|_| ConsensusError::FailedDecodePreprepare),
            MsgCode::Prepare => message
                .decode::<Subject>()
                .map(|s| s.view)
                .map_err(|_| ConsensusError::FailedDecodePrepare),
            MsgCode::Commit => message
                .decode::<Subject>()
                .map(|s| s.view)
                .map_err(|_| ConsensusError::FailedDecodeCommit),
            MsgCode::RoundChange => message
                .decode::<RoundChange>()
                .map(|r| r.view)
                .map_err(|_| ConsensusError::FailedDecodeRoundChange),
        }
    }

    /// Compare a message's view against the current view.
    ///
    /// ROUND-CHANGEs compare by sequence only: a vote for any round of the
    /// current sequence is evidence worth aggregating. Everything else must
    /// name the current view exactly, and is additionally deferred while
    /// this node waits for a round change, or while it has not yet accepted
    /// a PRE-PREPARE (PREPAREs and COMMITs for a proposal we have not seen
    /// yet are future traffic, not garbage).
    pub(crate) fn check_message(&self, code: MsgCode, view: View) -> Result<(), ConsensusError> {
        let current = self.current_view();

        if code == MsgCode::RoundChange {
            if view.sequence > current.sequence {
                return Err(ConsensusError::FutureMessage);
            }
            if view.sequence < current.sequence {
                return Err(ConsensusError::OldMessage);
            }
            return Ok(());
        }

        if view > current {
            return Err(ConsensusError::FutureMessage);
        }
        if view < current {
            return Err(ConsensusError::OldMessage);
        }
        if self.state == State::WaitingForNewRound {
            return Err(ConsensusError::FutureMessage);
        }
        if self.state == State::AcceptRequest && code != MsgCode::Preprepare {
            return Err(ConsensusError::FutureMessage);
        }
        Ok(())
    }

    /// Salvage value from past-view messages before dropping them: COMMITs
    /// for the just-committed sequence strengthen the parent seal, and a
    /// PRE-PREPARE for the committed proposal earns its sender a direct
    /// COMMIT so it can finish that sequence.
    fn handle_old_message(&mut self, message: &Message) {
        match message.code {
            MsgCode::Commit => {
                let Ok(subject) = message.decode::<Subject>() else {
                    return;
                };
                let (last_proposal, _) = self.backend.last_proposal();
                if subject.view.sequence != last_proposal.number
                    || subject.digest != last_proposal.hash()
                {
                    return;
                }
                let Some(seal) = message.committed_seal.clone() else {
                    return;
                };
                // The seal verifies under the previous committee's key.
                let Some(key) = self
                    .current()
                    .parent_commits()
                    .get_address_public_key(message.address)
                    .cloned()
                else {
                    return;
                };
                if !self
                    .backend
                    .verify_seal(&key, &commit_seal_payload(subject.digest), &seal)
                {
                    debug!(sender = ?message.address, "Old commit with invalid seal");
                    return;
                }
                if self.current_mut().add_parent_commit(message.clone()).is_ok() {
                    trace!(
                        sender = ?message.address,
                        sequence = subject.view.sequence,
                        "Accepted commit for the committed sequence"
                    );
                }
            }
            MsgCode::Preprepare => {
                let Ok(preprepare) = message.decode::<Preprepare>() else {
                    return;
                };
                let (last_proposal, _) = self.backend.last_proposal();
                if preprepare.view.sequence == last_proposal.number
                    && preprepare.proposal.hash() == last_proposal.hash()
                {
                    self.send_commit_for_old_block(
                        preprepare.view,
                        last_proposal.hash(),
                        message.address,
                    );
                }
            }
            _ => {}
        }
    }

    /// Replay parked messages that are no longer in the future. Runs after
    /// every state transition.
    pub(crate) fn process_backlog(&mut self) {
        let ready = self.backlog.drain_ready(self.current_view());
        for message in ready {
            let code = message.code;
            let sender = message.address;
            if let Err(err) = self.handle_checked_message(message) {
                trace!(%err, ?sender, ?code, "Backlogged message dropped on replay");
            }
        }
    }

    /// A round-change timer fired. Ignore it if we already moved past the
    /// view it was armed for; otherwise catch up (if the chain advanced
    /// under us) or push for the next round.
    pub(crate) fn handle_timeout(&mut self, view: View) {
        let current = self.current_view();
        let desired = View::new(current.sequence, self.current().desired_round());
        if view < desired {
            trace!(timer_view = %view, desired = %desired, "Stale timeout");
            return;
        }
        let (last_proposal, _) = self.backend.last_proposal();
        if last_proposal.number >= current.sequence {
            trace!(
                number = last_proposal.number,
                "Round change timeout, catching up to the latest sequence"
            );
            self.start_new_round(0);
        } else {
            self.send_next_round_change();
        }
    }

    /// The backend surfaced the committed block as chain head: move to the
    /// next sequence.
    pub(crate) fn handle_final_committed(&mut self) {
        debug!("Chain head advanced, starting new sequence");
        self.start_new_round(0);
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::ConsensusError;
    use crate::mocks::{build_commit, build_preprepare, genesis, test_core, Outbound};
    use istanbul_messages::{Message, MsgCode};
    use istanbul_types::View;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn check_message_gates_by_view_and_state() {
        // Freshly started: view (1, 0), state AcceptRequest.
        let (core, _, _, _rx) = test_core(4, 0);
        assert_eq!(core.current_view(), View::new(1, 0));

        // Only a PRE-PREPARE may arrive before a proposal is accepted;
        // votes for the current view are future traffic until then.
        assert_eq!(core.check_message(MsgCode::Preprepare, View::new(1, 0)), Ok(()));
        assert_eq!(
            core.check_message(MsgCode::Prepare, View::new(1, 0)),
            Err(ConsensusError::FutureMessage)
        );
        assert_eq!(
            core.check_message(MsgCode::Commit, View::new(1, 0)),
            Err(ConsensusError::FutureMessage)
        );

        // Strictly past and strictly future views.
        assert_eq!(
            core.check_message(MsgCode::Preprepare, View::new(0, 0)),
            Err(ConsensusError::OldMessage)
        );
        assert_eq!(
            core.check_message(MsgCode::Prepare, View::new(1, 1)),
            Err(ConsensusError::FutureMessage)
        );
        assert_eq!(
            core.check_message(MsgCode::Commit, View::new(2, 0)),
            Err(ConsensusError::FutureMessage)
        );

        // ROUND-CHANGE compares by sequence only: any round of the current
        // sequence is acceptable.
        assert_eq!(core.check_message(MsgCode::RoundChange, View::new(1, 9)), Ok(()));
        assert_eq!(
            core.check_message(MsgCode::RoundChange, View::new(0, 3)),
            Err(ConsensusError::OldMessage)
        );
        assert_eq!(
            core.check_message(MsgCode::RoundChange, View::new(2, 0)),
            Err(ConsensusError::FutureMessage)
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn old_commit_for_the_committed_block_strengthens_parent_seal() {
        let (mut core, _, registry, _rx) = test_core(4, 0);
        let sender = registry.keyring(2).clone();

        // The chain head is genesis (sequence 0); a straggler's COMMIT for
        // it is old, but its seal still counts toward the parent.
        let payload = build_commit(&sender, View::new(0, 0), genesis().hash());
        assert_eq!(
            core.handle_message(&payload),
            Err(ConsensusError::OldMessage)
        );
        assert!(core
            .round_state()
            .unwrap()
            .parent_commits()
            .contains(sender.address));
    }

    #[traced_test]
    #[tokio::test]
    async fn old_preprepare_earns_the_sender_a_direct_commit() {
        let (mut core, backend, registry, _rx) = test_core(4, 0);
        let sender = registry.keyring(3).clone();

        let payload = build_preprepare(&sender, View::new(0, 0), genesis());
        assert_eq!(
            core.handle_message(&payload),
            Err(ConsensusError::OldMessage)
        );

        let reply = backend
            .take_outbound()
            .into_iter()
            .find_map(|out| match out {
                Outbound::Send { payload, target } if target == sender.address => Some(payload),
                _ => None,
            })
            .expect("commit sent back to the lagging proposer");
        let message = Message::from_payload(&reply, |_, _, _| true).unwrap();
        assert_eq!(message.code, MsgCode::Commit);
        assert!(message.committed_seal.is_some());
    }
}
