//! Protocol positions: views and subjects.

use crate::Hash;
use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// A consensus position: the block height being agreed on (`sequence`) and
/// the attempt number within it (`round`).
///
/// Ordering is lexicographic: all rounds of sequence N sort below round 0 of
/// sequence N+1. A node's current view is monotonically non-decreasing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct View {
    pub sequence: u64,
    pub round: u64,
}

impl View {
    pub fn new(sequence: u64, round: u64) -> Self {
        Self { sequence, round }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence, self.round)
    }
}

/// The content PREPARE and COMMIT messages agree on: a view and the digest
/// of the proposal accepted at that view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Subject {
    pub view: View,
    pub digest: Hash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_ordering_is_lexicographic() {
        let a = View::new(1, 5);
        let b = View::new(2, 0);
        let c = View::new(2, 1);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(View::new(3, 3), View::new(3, 3));
    }

    #[test]
    fn view_displays_sequence_then_round() {
        assert_eq!(View::new(7, 2).to_string(), "7/2");
    }
}
