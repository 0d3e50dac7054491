//! PREPARE sending and handling.

use crate::core::{Core, State};
use crate::errors::ConsensusError;
use istanbul_messages::{Message, MsgCode, Subject};
use tracing::{debug, info};

impl Core {
    /// Broadcast a PREPARE for the accepted proposal. Every validator,
    /// proposer included, prepares; the proposer's PREPARE is how its
    /// PRE-PREPARE counts toward the quorum.
    pub(crate) fn send_prepare(&mut self) {
        let Some(subject) = self.current().subject() else {
            return;
        };
        let message = Message::new(MsgCode::Prepare, &subject, self.address);
        self.broadcast(message);
    }

    pub(crate) fn handle_prepare(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let subject: Subject = message
            .decode()
            .map_err(|_| ConsensusError::FailedDecodePrepare)?;
        self.verify_subject(&subject)?;
        self.current_mut().add_prepare(message.clone())?;

        debug!(
            sender = ?message.address,
            prepares = self.current().prepares().size(),
            "Accepted prepare"
        );

        let quorum = self.val_set.min_quorum_size();
        if self.state == State::Preprepared && self.current().prepare_or_commit_size() >= quorum {
            let certificate = self
                .current()
                .create_prepared_certificate(quorum)
                .expect("quorum was just counted");
            self.current_mut().set_prepared_certificate(certificate);
            info!(view = %self.current_view(), "Reached prepared state");
            self.set_state(State::Prepared);
            self.send_commit();
        }
        Ok(())
    }

    /// PREPAREs and COMMITs must name exactly the current view and the
    /// accepted proposal's digest.
    pub(crate) fn verify_subject(&self, subject: &Subject) -> Result<(), ConsensusError> {
        match self.current().subject() {
            Some(expected) if expected == *subject => Ok(()),
            _ => {
                if self.backend.has_bad_proposal(subject.digest) {
                    debug!(digest = ?subject.digest, "Subject names a known bad proposal");
                }
                Err(ConsensusError::InconsistentSubject)
            }
        }
    }
}
