//! Validation of prepared and round-change certificates.

use crate::core::Core;
use crate::errors::ConsensusError;
use istanbul_messages::{Message, MsgCode, PreparedCertificate, Preprepare, RoundChange, Subject};
use istanbul_types::{Address, Hash};
use std::collections::HashSet;

impl Core {
    /// A prepared certificate is valid iff it holds exactly a quorum of
    /// PREPARE/COMMIT envelopes from distinct validators, all correctly
    /// signed, all naming one view of a non-future sequence, and all
    /// carrying the digest of the certificate's proposal.
    pub(crate) fn verify_prepared_certificate(
        &self,
        certificate: &PreparedCertificate,
    ) -> Result<(), ConsensusError> {
        if certificate.prepare_or_commit_messages.len() != self.val_set.min_quorum_size() {
            return Err(ConsensusError::InvalidPreparedCertificateNumMsgs);
        }

        let expected_digest = certificate.proposal.hash();
        let mut seen: HashSet<Address> = HashSet::new();
        let mut expected_view = None;
        for message in &certificate.prepare_or_commit_messages {
            if !seen.insert(message.address) {
                return Err(ConsensusError::InvalidPreparedCertificateDuplicate);
            }
            if message.code != MsgCode::Prepare && message.code != MsgCode::Commit {
                return Err(ConsensusError::InvalidPreparedCertificateMsgCode);
            }
            if !self.val_set.contains(message.address) {
                return Err(ConsensusError::UnauthorizedAddress);
            }
            self.check_certificate_signature(message)
                .map_err(|_| ConsensusError::InvalidPreparedCertificateMsgSignature)?;

            let subject: Subject = message.decode().map_err(|_| match message.code {
                MsgCode::Commit => ConsensusError::FailedDecodeCommit,
                _ => ConsensusError::FailedDecodePrepare,
            })?;
            if subject.view.sequence > self.current_view().sequence {
                return Err(ConsensusError::InvalidPreparedCertificateMsgView);
            }
            match expected_view {
                None => expected_view = Some(subject.view),
                Some(view) if view != subject.view => {
                    return Err(ConsensusError::InvalidPreparedCertificateMsgView);
                }
                Some(_) => {}
            }
            if subject.digest != expected_digest {
                return Err(ConsensusError::InvalidPreparedCertificateDigestMismatch);
            }
        }
        Ok(())
    }

    /// A NEW-ROUND pre-prepare's round-change certificate is valid iff it
    /// holds at least a quorum of correctly signed ROUND-CHANGEs from
    /// distinct validators, each targeting this sequence at the
    /// pre-prepare's round or higher; and the pre-prepare's proposal equals
    /// the proposal of the highest-round embedded prepared certificate, if
    /// any exists.
    pub(crate) fn verify_round_change_certificate(
        &self,
        preprepare: &Preprepare,
    ) -> Result<(), ConsensusError> {
        let certificate = &preprepare.round_change_certificate;
        let count = certificate.round_change_messages.len();
        if count < self.val_set.min_quorum_size() || count > self.val_set.size() {
            return Err(ConsensusError::InvalidRoundChangeCertificateNumMsgs);
        }

        let mut seen: HashSet<Address> = HashSet::new();
        let mut max_round = None;
        let mut inherited_digest: Option<Hash> = None;
        for message in &certificate.round_change_messages {
            if !seen.insert(message.address) {
                return Err(ConsensusError::InvalidRoundChangeCertificateDuplicate);
            }
            if message.code != MsgCode::RoundChange {
                return Err(ConsensusError::InvalidRoundChangeCertificateMsgCode);
            }
            if !self.val_set.contains(message.address) {
                return Err(ConsensusError::UnauthorizedAddress);
            }
            self.check_certificate_signature(message)
                .map_err(|_| ConsensusError::InvalidRoundChangeCertificateMsgSignature)?;

            let round_change: RoundChange = message
                .decode()
                .map_err(|_| ConsensusError::FailedDecodeRoundChange)?;
            if round_change.view.sequence != preprepare.view.sequence
                || round_change.view.round < preprepare.view.round
            {
                return Err(ConsensusError::InvalidRoundChangeCertificateMsgView);
            }

            if round_change.has_prepared_certificate() {
                self.verify_prepared_certificate(&round_change.prepared_certificate)?;
                let view = round_change
                    .prepared_certificate
                    .view()
                    .ok_or(ConsensusError::InvalidPreparedCertificateMsgView)?;
                // Same-round certificates agree by quorum intersection, so
                // any highest-round one fixes the inherited proposal.
                if max_round.is_none_or(|m| view.round > m) {
                    max_round = Some(view.round);
                    inherited_digest = Some(round_change.prepared_certificate.proposal.hash());
                }
            }
        }

        if let Some(digest) = inherited_digest {
            if preprepare.proposal.hash() != digest {
                return Err(ConsensusError::InvalidPreparedCertificateDigestMismatch);
            }
        }
        Ok(())
    }

    /// Envelope signature check for a certificate-embedded message.
    fn check_certificate_signature(&self, message: &Message) -> Result<(), ConsensusError> {
        let data = message.payload_for_signing();
        self.backend
            .check_signature(&data, message.address, &message.signature)
            .map_err(|_| ConsensusError::InvalidMessage)
    }
}
