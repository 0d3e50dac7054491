//! The ROUND-CHANGE body.

use crate::PreparedCertificate;
use borsh::{BorshDeserialize, BorshSerialize};
use istanbul_types::View;

/// A vote to move to `view.round` at `view.sequence`, carrying the best
/// prepared certificate the sender knows so a prepared proposal survives
/// the round change.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RoundChange {
    pub view: View,
    pub prepared_certificate: PreparedCertificate,
}

impl RoundChange {
    pub fn new(view: View, prepared_certificate: PreparedCertificate) -> Self {
        Self {
            view,
            prepared_certificate,
        }
    }

    pub fn has_prepared_certificate(&self) -> bool {
        !self.prepared_certificate.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_change_round_trip() {
        let rc = RoundChange::new(View::new(4, 2), PreparedCertificate::empty());
        let bytes = borsh::to_vec(&rc).unwrap();
        let decoded = RoundChange::try_from_slice(&bytes).unwrap();
        assert_eq!(decoded, rc);
        assert!(!decoded.has_prepared_certificate());
    }
}
