//! ROUND-CHANGE sending and handling.

use crate::core::{Core, State};
use crate::errors::ConsensusError;
use istanbul_messages::{Message, MsgCode, RoundChange};
use istanbul_types::View;
use tracing::{debug, trace};

impl Core {
    /// Ask for the round after the one we are already waiting for.
    pub(crate) fn send_next_round_change(&mut self) {
        let next = self.current().desired_round() + 1;
        self.wait_for_desired_round(next);
    }

    /// Broadcast a ROUND-CHANGE for `round`, carrying the best prepared
    /// certificate we hold so a prepared proposal survives the change.
    pub(crate) fn send_round_change(&mut self, round: u64) {
        let view = View::new(self.current_view().sequence, round);
        debug!(view = %view, "Sending round change");
        let body = RoundChange::new(view, self.current().prepared_certificate().clone());
        let message = Message::new(MsgCode::RoundChange, &body, self.address);
        self.broadcast(message);
    }

    pub(crate) fn handle_round_change(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let round_change: RoundChange = message
            .decode()
            .map_err(|_| ConsensusError::FailedDecodeRoundChange)?;

        if round_change.has_prepared_certificate() {
            self.verify_prepared_certificate(&round_change.prepared_certificate)?;
            // The certificate must be from this sequence, at a round below
            // the one being requested.
            let view = round_change
                .prepared_certificate
                .view()
                .ok_or(ConsensusError::InvalidPreparedCertificateMsgView)?;
            if view.sequence != round_change.view.sequence || view.round >= round_change.view.round
            {
                return Err(ConsensusError::InvalidPreparedCertificateMsgView);
            }
        }

        self.round_change_set
            .add(round_change.view.round, message.clone())?;
        trace!(
            sender = ?message.address,
            round = round_change.view.round,
            "Accepted round change"
        );

        // Liveness jump: if f+1 validators are already past us, at least
        // one of them is honest, so follow them even without quorum.
        let fast_forward_threshold = self.val_set.f() + 1;
        if let Some(round) = self.round_change_set.max_round(fast_forward_threshold) {
            if round > self.current().desired_round() {
                debug!(round, "f+1 round changes ahead, fast-forwarding");
                self.wait_for_desired_round(round);
            }
        }

        // Quorum: start the agreed round. The proposer branch inside
        // start_new_round sends the NEW-ROUND pre-prepare.
        if let Some(round) = self.round_change_set.max_round(self.val_set.min_quorum_size()) {
            if round >= self.current().desired_round()
                && (self.state == State::WaitingForNewRound || self.proposes_at(round))
            {
                debug!(round, "Round change quorum reached, starting new round");
                self.start_new_round(round);
            }
        }
        Ok(())
    }

    /// Whether this node would be the proposer at `round` of the current
    /// sequence. Pure query; does not move the set's proposer.
    fn proposes_at(&self, round: u64) -> bool {
        let (_, last_proposer) = self.backend.last_proposal();
        let mut val_set = self.val_set.clone();
        val_set.calc_proposer(last_proposer, round);
        val_set.is_proposer(self.address)
    }
}
