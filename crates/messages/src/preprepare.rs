//! The PRE-PREPARE body.

use crate::RoundChangeCertificate;
use borsh::{BorshDeserialize, BorshSerialize};
use istanbul_types::{Proposal, View};

/// The proposer's opening move for a round: the proposal for `view` and, for
/// rounds above zero, the round-change certificate that authorizes
/// proposing at that round.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Preprepare {
    pub view: View,
    pub proposal: Proposal,
    /// Empty at round 0; quorum-sized for any NEW-ROUND pre-prepare.
    pub round_change_certificate: RoundChangeCertificate,
}

impl Preprepare {
    pub fn new(view: View, proposal: Proposal) -> Self {
        Self {
            view,
            proposal,
            round_change_certificate: RoundChangeCertificate::empty(),
        }
    }

    pub fn with_certificate(
        view: View,
        proposal: Proposal,
        round_change_certificate: RoundChangeCertificate,
    ) -> Self {
        Self {
            view,
            proposal,
            round_change_certificate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istanbul_types::Hash;

    #[test]
    fn preprepare_round_trip() {
        let pp = Preprepare::new(View::new(5, 0), Proposal::new(5, Hash::of(b"parent"), 1, vec![]));
        let bytes = borsh::to_vec(&pp).unwrap();
        assert_eq!(Preprepare::try_from_slice(&bytes).unwrap(), pp);
    }
}
