//! COMMIT sending and handling.

use crate::core::{Core, State};
use crate::errors::{BackendError, ConsensusError};
use istanbul_messages::{commit_seal_payload, Message, MsgCode, Subject};
use istanbul_types::{Address, Hash, View};
use tracing::{debug, warn};

impl Core {
    /// Broadcast a COMMIT with this node's BLS seal over the accepted
    /// proposal. Only sent after reaching Prepared.
    pub(crate) fn send_commit(&mut self) {
        let Some(subject) = self.current().subject() else {
            return;
        };
        match self.build_commit_message(subject) {
            Ok(message) => self.broadcast(message),
            Err(err) => warn!(%err, "Failed to create committed seal"),
        }
    }

    /// A COMMIT addressed to one peer for an already-committed block, so a
    /// lagging proposer can finish its sequence.
    pub(crate) fn send_commit_for_old_block(&mut self, view: View, digest: Hash, target: Address) {
        let subject = Subject { view, digest };
        let message = match self.build_commit_message(subject) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "Failed to create committed seal for old block");
                return;
            }
        };
        let mut message = message;
        match self.finalize_message(&mut message) {
            Ok(payload) => {
                debug!(peer = ?target, view = %view, "Sending commit for old block");
                if let Err(err) = self.backend.send(payload, target) {
                    warn!(%err, "Failed to send commit for old block");
                }
            }
            Err(err) => warn!(%err, "Failed to finalize commit for old block"),
        }
    }

    fn build_commit_message(&self, subject: Subject) -> Result<Message, BackendError> {
        let seal = self.backend.sign_seal(&commit_seal_payload(subject.digest))?;
        let mut message = Message::new(MsgCode::Commit, &subject, self.address);
        message.committed_seal = Some(seal);
        Ok(message)
    }

    pub(crate) fn handle_commit(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let subject: Subject = message
            .decode()
            .map_err(|_| ConsensusError::FailedDecodeCommit)?;
        self.verify_subject(&subject)?;
        self.verify_committed_seal(message, &subject)?;
        self.current_mut().add_commit(message.clone())?;

        debug!(
            sender = ?message.address,
            commits = self.current().commits().size(),
            "Accepted commit"
        );

        if self.current().commits().size() >= self.val_set.min_quorum_size()
            && self.state >= State::Prepared
            && self.state < State::Committed
        {
            self.commit();
        }
        Ok(())
    }

    /// The committed seal must be present and verify over
    /// `digest ∥ COMMIT-code` under the sender's BLS key.
    fn verify_committed_seal(
        &self,
        message: &Message,
        subject: &Subject,
    ) -> Result<(), ConsensusError> {
        let Some(seal) = &message.committed_seal else {
            return Err(ConsensusError::InvalidCommittedSeal);
        };
        let (_, validator) = self
            .val_set
            .get_by_address(message.address)
            .ok_or(ConsensusError::UnauthorizedAddress)?;
        let data = commit_seal_payload(subject.digest);
        if !self
            .backend
            .verify_seal(&validator.bls_public_key, &data, seal)
        {
            return Err(ConsensusError::InvalidCommittedSeal);
        }
        Ok(())
    }
}
