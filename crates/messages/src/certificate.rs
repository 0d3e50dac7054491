//! Quorum certificates carried across rounds.

use crate::{Message, Subject};
use borsh::{BorshDeserialize, BorshSerialize};
use istanbul_types::{Proposal, View};

/// Proof that some node reached the Prepared state: a proposal together
/// with a quorum of PREPARE or COMMIT envelopes that all name its digest at
/// one view.
///
/// The empty certificate (no messages) is a distinguished value: a
/// ROUND-CHANGE that never prepared carries it.
#[derive(Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct PreparedCertificate {
    pub proposal: Proposal,
    pub prepare_or_commit_messages: Vec<Message>,
}

impl PreparedCertificate {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.prepare_or_commit_messages.is_empty()
    }

    /// The view the certificate's messages agree on, decoded from the first
    /// message. `None` for the empty certificate or an undecodable message;
    /// full validation checks every message.
    pub fn view(&self) -> Option<View> {
        let first = self.prepare_or_commit_messages.first()?;
        first.decode::<Subject>().ok().map(|s| s.view)
    }
}

/// A quorum of ROUND-CHANGE envelopes, one per distinct sender, each naming
/// the target round or higher. Authorizes the new proposer's PRE-PREPARE.
#[derive(Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct RoundChangeCertificate {
    pub round_change_messages: Vec<Message>,
}

impl RoundChangeCertificate {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.round_change_messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MsgCode;
    use istanbul_types::{Address, Hash};

    #[test]
    fn empty_certificate_is_distinguished() {
        let cert = PreparedCertificate::empty();
        assert!(cert.is_empty());
        assert_eq!(cert.view(), None);
    }

    #[test]
    fn view_comes_from_first_message() {
        let subject = Subject {
            view: View::new(3, 1),
            digest: Hash::of(b"p"),
        };
        let cert = PreparedCertificate {
            proposal: Proposal::default(),
            prepare_or_commit_messages: vec![Message::new(
                MsgCode::Prepare,
                &subject,
                Address([1; 20]),
            )],
        };
        assert_eq!(cert.view(), Some(View::new(3, 1)));
    }

    #[test]
    fn certificate_round_trip() {
        let subject = Subject {
            view: View::new(2, 0),
            digest: Hash::of(b"p"),
        };
        let cert = PreparedCertificate {
            proposal: Proposal::new(2, Hash::ZERO, 9, vec![1]),
            prepare_or_commit_messages: vec![
                Message::new(MsgCode::Prepare, &subject, Address([1; 20])),
                Message::new(MsgCode::Commit, &subject, Address([2; 20])),
            ],
        };
        let bytes = borsh::to_vec(&cert).unwrap();
        assert_eq!(PreparedCertificate::try_from_slice(&bytes).unwrap(), cert);
    }
}
