//! Validator identities, the ordered validator set, and proposer selection.

use crate::{Address, BlsPublicKey};
use borsh::{BorshDeserialize, BorshSerialize};

/// An authorized signer: its account address and the BLS public key its
/// committed seals verify under.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Validator {
    pub address: Address,
    pub bls_public_key: BlsPublicKey,
}

impl Validator {
    pub fn new(address: Address, bls_public_key: BlsPublicKey) -> Self {
        Self {
            address,
            bls_public_key,
        }
    }
}

/// How the proposer rotates across rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProposerPolicy {
    /// The proposer after the last one, shifted by the round number.
    #[default]
    RoundRobin,
    /// The same proposer keeps proposing until a round change forces a move.
    Sticky,
}

/// The ordered set of validators authorized for one sequence.
///
/// Validators are kept in ascending address order; indices into this order
/// are what the committed-seal bitmap refers to. The set also tracks the
/// current proposer, recomputed on every round start via [`calc_proposer`].
///
/// [`calc_proposer`]: ValidatorSet::calc_proposer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    policy: ProposerPolicy,
    proposer: usize,
}

impl ValidatorSet {
    /// Build a set from validators, sorting them by address.
    ///
    /// The initial proposer is the lowest address; callers recompute it for
    /// the actual round via [`ValidatorSet::calc_proposer`].
    pub fn new(mut validators: Vec<Validator>, policy: ProposerPolicy) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        validators.dedup_by(|a, b| a.address == b.address);
        Self {
            validators,
            policy,
            proposer: 0,
        }
    }

    /// Override the proposer rotation policy (the consensus config owns
    /// this choice, not the set's producer).
    pub fn set_policy(&mut self, policy: ProposerPolicy) {
        self.policy = policy;
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validators in ascending address order.
    pub fn list(&self) -> &[Validator] {
        &self.validators
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Look up a validator and its bitmap index by address.
    pub fn get_by_address(&self, address: Address) -> Option<(usize, &Validator)> {
        self.validators
            .binary_search_by(|v| v.address.cmp(&address))
            .ok()
            .map(|i| (i, &self.validators[i]))
    }

    pub fn contains(&self, address: Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// The number of Byzantine validators the set tolerates: ⌈n/3⌉ − 1.
    pub fn f(&self) -> usize {
        let n = self.size();
        if n == 0 {
            return 0;
        }
        n.div_ceil(3) - 1
    }

    /// The smallest quorum guaranteeing that any two quorums intersect in an
    /// honest validator: ⌊2n/3⌋ + 1, degenerating to n below four members.
    pub fn min_quorum_size(&self) -> usize {
        let n = self.size();
        if n < 4 {
            n
        } else {
            2 * n / 3 + 1
        }
    }

    /// The current proposer.
    ///
    /// Panics on an empty set; consensus never runs without validators.
    pub fn proposer(&self) -> &Validator {
        &self.validators[self.proposer]
    }

    pub fn is_proposer(&self, address: Address) -> bool {
        !self.is_empty() && self.proposer().address == address
    }

    /// Recompute the proposer for `round`, given the proposer of the last
    /// committed block (`Address::ZERO` when there is none).
    pub fn calc_proposer(&mut self, last_proposer: Address, round: u64) {
        if self.is_empty() {
            return;
        }
        let offset = self
            .get_by_address(last_proposer)
            .map(|(i, _)| i as u64)
            .unwrap_or(0);
        let seed = if last_proposer.is_zero() {
            round
        } else {
            match self.policy {
                ProposerPolicy::RoundRobin => offset + round + 1,
                ProposerPolicy::Sticky => offset + round,
            }
        };
        self.proposer = (seed % self.size() as u64) as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(n: u8, policy: ProposerPolicy) -> ValidatorSet {
        let validators = (0..n)
            .map(|i| Validator::new(Address([i + 1; 20]), BlsPublicKey(vec![i])))
            .collect();
        ValidatorSet::new(validators, policy)
    }

    #[test]
    fn ordered_and_deduplicated() {
        let a = Validator::new(Address([9; 20]), BlsPublicKey(vec![]));
        let b = Validator::new(Address([1; 20]), BlsPublicKey(vec![]));
        let dup = Validator::new(Address([9; 20]), BlsPublicKey(vec![]));
        let set = ValidatorSet::new(vec![a, b, dup], ProposerPolicy::RoundRobin);
        assert_eq!(set.size(), 2);
        assert_eq!(set.get_by_index(0).unwrap().address, Address([1; 20]));
        assert_eq!(set.get_by_address(Address([9; 20])).unwrap().0, 1);
    }

    #[test]
    fn quorum_sizing() {
        assert_eq!(set_of(1, ProposerPolicy::RoundRobin).min_quorum_size(), 1);
        assert_eq!(set_of(3, ProposerPolicy::RoundRobin).min_quorum_size(), 3);
        assert_eq!(set_of(4, ProposerPolicy::RoundRobin).min_quorum_size(), 3);
        assert_eq!(set_of(7, ProposerPolicy::RoundRobin).min_quorum_size(), 5);
        assert_eq!(set_of(10, ProposerPolicy::RoundRobin).min_quorum_size(), 7);
    }

    #[test]
    fn fault_tolerance() {
        assert_eq!(set_of(4, ProposerPolicy::RoundRobin).f(), 1);
        assert_eq!(set_of(7, ProposerPolicy::RoundRobin).f(), 2);
        assert_eq!(set_of(10, ProposerPolicy::RoundRobin).f(), 3);
    }

    #[test]
    fn round_robin_advances_past_last_proposer() {
        let mut set = set_of(4, ProposerPolicy::RoundRobin);

        // No last proposer: round selects directly.
        set.calc_proposer(Address::ZERO, 0);
        let first = set.proposer().address;
        assert_eq!(first, set.get_by_index(0).unwrap().address);

        // Last proposer at index 0, round 0: next in order.
        set.calc_proposer(first, 0);
        assert_eq!(set.proposer().address, set.get_by_index(1).unwrap().address);

        // Same last proposer, round 2: shifted two further.
        set.calc_proposer(first, 2);
        assert_eq!(set.proposer().address, set.get_by_index(3).unwrap().address);
    }

    #[test]
    fn sticky_keeps_proposer_until_round_change() {
        let mut set = set_of(4, ProposerPolicy::Sticky);
        let v1 = set.get_by_index(1).unwrap().address;

        set.calc_proposer(v1, 0);
        assert_eq!(set.proposer().address, v1);

        set.calc_proposer(v1, 1);
        assert_eq!(set.proposer().address, set.get_by_index(2).unwrap().address);
    }

    #[test]
    fn proposer_wraps_around() {
        let mut set = set_of(4, ProposerPolicy::RoundRobin);
        let last = set.get_by_index(3).unwrap().address;
        set.calc_proposer(last, 0);
        assert_eq!(set.proposer().address, set.get_by_index(0).unwrap().address);
    }
}
