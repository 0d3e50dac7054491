//! The consensus-visible view of a block.

use crate::Hash;
use borsh::{BorshDeserialize, BorshSerialize};

/// A block proposal as consensus sees it.
///
/// Consensus only needs the chain position (`number`, `parent_hash`), the
/// proposer's timestamp (for future-block gating), and the encoded body.
/// Execution and full validation happen behind `Backend::verify`.
///
/// Two proposals are equal iff their content is equal, which is equivalent
/// to hash equality since [`Proposal::hash`] covers every field.
#[derive(Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    /// Block height. Consensus sequence N agrees on the proposal numbered N.
    pub number: u64,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Proposer-declared timestamp, seconds since the unix epoch.
    pub timestamp: u64,
    /// Opaque encoded block body.
    pub payload: Vec<u8>,
}

impl Proposal {
    pub fn new(number: u64, parent_hash: Hash, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            number,
            parent_hash,
            timestamp,
            payload,
        }
    }

    /// Content hash over the canonical encoding.
    pub fn hash(&self) -> Hash {
        let encoded = borsh::to_vec(self).expect("proposal encoding is infallible");
        Hash::of(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_all_fields() {
        let base = Proposal::new(1, Hash::ZERO, 100, vec![1, 2, 3]);
        let mut bumped_number = base.clone();
        bumped_number.number = 2;
        let mut bumped_payload = base.clone();
        bumped_payload.payload = vec![1, 2, 4];

        assert_eq!(base.hash(), base.clone().hash());
        assert_ne!(base.hash(), bumped_number.hash());
        assert_ne!(base.hash(), bumped_payload.hash());
    }
}
