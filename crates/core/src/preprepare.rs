//! PRE-PREPARE sending and handling.

use crate::core::{Core, State};
use crate::errors::{ConsensusError, ProposalError};
use istanbul_messages::{Message, MsgCode, Preprepare, RoundChangeCertificate};
use istanbul_types::Proposal;
use std::time::Instant;
use tracing::{debug, trace, warn};

impl Core {
    /// Broadcast a PRE-PREPARE for `proposal` at the current view. Only the
    /// round's proposer sends, and only for the sequence being worked on;
    /// NEW-ROUND pre-prepares must carry a round-change certificate.
    pub(crate) fn send_preprepare(&mut self, proposal: Proposal, certificate: RoundChangeCertificate) {
        let view = self.current_view();
        if proposal.number != view.sequence || !self.is_proposer() {
            return;
        }
        if view.round > 0 && certificate.is_empty() {
            warn!(view = %view, "Refusing to send NEW-ROUND pre-prepare without certificate");
            return;
        }
        debug!(view = %view, hash = ?proposal.hash(), "Sending pre-prepare");
        let preprepare = Preprepare::with_certificate(view, proposal, certificate);
        let message = Message::new(MsgCode::Preprepare, &preprepare, self.address);
        self.broadcast(message);
    }

    pub(crate) fn handle_preprepare(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let preprepare: Preprepare = message
            .decode()
            .map_err(|_| ConsensusError::FailedDecodePreprepare)?;

        // The certificate and the round must agree: none at round 0, a
        // quorum-backed one for any NEW-ROUND pre-prepare.
        let has_certificate = !preprepare.round_change_certificate.is_empty();
        if (preprepare.view.round == 0) == has_certificate {
            return Err(ConsensusError::InvalidPreprepareView);
        }

        if !self.val_set.is_proposer(message.address) {
            warn!(sender = ?message.address, "Pre-prepare from non-proposer");
            return Err(ConsensusError::NotFromProposer);
        }

        if has_certificate {
            self.verify_round_change_certificate(&preprepare)?;
        }

        match self.backend.verify(&preprepare.proposal) {
            Ok(()) => {}
            Err(ProposalError::FutureBlock { wait }) => {
                // Statically fine, just early: retry once its timestamp is
                // reachable.
                trace!(?wait, "Proposal is a future block, scheduling retry");
                self.timers.set_future_preprepare_timer(message.payload(), wait);
                return Err(ConsensusError::FutureBlock);
            }
            Err(ProposalError::Invalid) => {
                warn!(hash = ?preprepare.proposal.hash(), "Proposal failed verification");
                return Err(ConsensusError::InvalidMessage);
            }
        }

        if self.state == State::AcceptRequest {
            self.consensus_started = Some(Instant::now());
            self.current_mut().set_preprepare(preprepare);
            self.set_state(State::Preprepared);
            self.send_prepare();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::State;
    use crate::errors::ConsensusError;
    use crate::events::CoreEvent;
    use crate::mocks::{build_preprepare, test_core};
    use istanbul_types::{Hash, Proposal, View};
    use std::time::Duration;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn future_block_is_rescheduled_and_retried() {
        let (mut core, backend, registry, mut timer_rx) = test_core(4, 1);
        let proposer = core.val_set().proposer().address;
        let keyring = registry.keyring_by_address(proposer).unwrap().clone();

        let proposal = Proposal::new(1, Hash::ZERO, 90, vec![1]);
        backend.set_future_block(proposal.hash(), Duration::from_millis(10));

        let payload = build_preprepare(&keyring, View::new(1, 0), proposal.clone());
        assert_eq!(
            core.handle_message(&payload),
            Err(ConsensusError::FutureBlock)
        );
        assert_eq!(core.state(), State::AcceptRequest);

        // The future-preprepare timer re-posts the original payload.
        let event = tokio::time::timeout(Duration::from_millis(500), timer_rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        let CoreEvent::MessageReceived { payload: replayed } = event else {
            panic!("expected a replayed message");
        };
        assert_eq!(replayed, payload);

        // The retry passes verification and is accepted.
        core.handle_event(CoreEvent::MessageReceived { payload: replayed });
        assert_eq!(core.state(), State::Preprepared);
        assert_eq!(
            core.round_state().unwrap().proposal().map(|p| p.hash()),
            Some(proposal.hash())
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn bad_proposal_is_rejected() {
        let (mut core, backend, registry, _rx) = test_core(4, 1);
        let proposer = core.val_set().proposer().address;
        let keyring = registry.keyring_by_address(proposer).unwrap().clone();

        let proposal = Proposal::new(1, Hash::ZERO, 0, vec![1]);
        backend.mark_bad(proposal.hash());

        let payload = build_preprepare(&keyring, View::new(1, 0), proposal);
        assert_eq!(
            core.handle_message(&payload),
            Err(ConsensusError::InvalidMessage)
        );
        assert_eq!(core.state(), State::AcceptRequest);
    }

    #[traced_test]
    #[tokio::test]
    async fn preprepare_from_non_proposer_is_rejected() {
        let (mut core, _, registry, _rx) = test_core(4, 1);
        let proposer = core.val_set().proposer().address;
        let other = (0..4)
            .map(|i| registry.keyring(i).clone())
            .find(|k| k.address != proposer)
            .unwrap();

        let proposal = Proposal::new(1, Hash::ZERO, 0, vec![1]);
        let payload = build_preprepare(&other, View::new(1, 0), proposal);
        assert_eq!(
            core.handle_message(&payload),
            Err(ConsensusError::NotFromProposer)
        );
    }
}
