//! Per-round message aggregation.

use crate::errors::ConsensusError;
use istanbul_messages::Message;
use istanbul_types::{Address, BlsPublicKey, ValidatorSet, View};
use std::collections::btree_map::{BTreeMap, Values};

/// A deduplicated store of one message kind for one round, keyed by sender.
///
/// Holds at most one message per sender; inserting again for the same
/// sender replaces the stored message, so `size()` counts distinct senders.
/// Only members of the round's validator set are accepted. Iteration is in
/// ascending sender order, which keeps seal aggregation deterministic.
#[derive(Debug, Clone)]
pub struct MessageSet {
    view: View,
    val_set: ValidatorSet,
    messages: BTreeMap<Address, Message>,
}

impl MessageSet {
    pub(crate) fn new(view: View, val_set: ValidatorSet) -> Self {
        Self {
            view,
            val_set,
            messages: BTreeMap::new(),
        }
    }

    /// The view this set aggregates for.
    pub fn view(&self) -> View {
        self.view
    }

    pub(crate) fn validator_set(&self) -> &ValidatorSet {
        &self.val_set
    }

    /// Insert a message, keyed by its sender.
    pub(crate) fn add(&mut self, message: Message) -> Result<(), ConsensusError> {
        if !self.val_set.contains(message.address) {
            return Err(ConsensusError::UnauthorizedAddress);
        }
        self.messages.insert(message.address, message);
        Ok(())
    }

    /// Remove a sender's message, if present.
    pub(crate) fn remove(&mut self, address: Address) -> Option<Message> {
        self.messages.remove(&address)
    }

    /// Number of distinct senders stored.
    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.messages.contains_key(&address)
    }

    /// Stored messages in ascending sender order.
    pub fn values(&self) -> Values<'_, Address, Message> {
        self.messages.values()
    }

    /// A sender's index in the validator set, for the seal bitmap.
    pub fn get_address_index(&self, address: Address) -> Option<usize> {
        self.val_set.get_by_address(address).map(|(i, _)| i)
    }

    /// A sender's BLS public key, for seal verification.
    pub fn get_address_public_key(&self, address: Address) -> Option<&BlsPublicKey> {
        self.val_set
            .get_by_address(address)
            .map(|(_, v)| &v.bls_public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istanbul_messages::MsgCode;
    use istanbul_types::{BlsPublicKey, Hash, ProposerPolicy, Subject, Validator};

    fn val_set(n: u8) -> ValidatorSet {
        let validators = (0..n)
            .map(|i| Validator::new(Address([i + 1; 20]), BlsPublicKey(vec![i])))
            .collect();
        ValidatorSet::new(validators, ProposerPolicy::RoundRobin)
    }

    fn prepare_from(address: Address) -> Message {
        let subject = Subject {
            view: View::new(1, 0),
            digest: Hash::of(b"p"),
        };
        Message::new(MsgCode::Prepare, &subject, address)
    }

    #[test]
    fn one_message_per_sender() {
        let mut set = MessageSet::new(View::new(1, 0), val_set(4));
        set.add(prepare_from(Address([1; 20]))).unwrap();
        set.add(prepare_from(Address([2; 20]))).unwrap();
        assert_eq!(set.size(), 2);

        // A second message from the same sender does not grow the set.
        set.add(prepare_from(Address([1; 20]))).unwrap();
        assert_eq!(set.size(), 2);
    }

    #[test]
    fn rejects_non_members() {
        let mut set = MessageSet::new(View::new(1, 0), val_set(4));
        let err = set.add(prepare_from(Address([99; 20]))).unwrap_err();
        assert_eq!(err, ConsensusError::UnauthorizedAddress);
        assert_eq!(set.size(), 0);
    }

    #[test]
    fn index_and_key_lookups_follow_the_validator_set() {
        let set = MessageSet::new(View::new(1, 0), val_set(4));
        assert_eq!(set.get_address_index(Address([3; 20])), Some(2));
        assert_eq!(
            set.get_address_public_key(Address([3; 20])),
            Some(&BlsPublicKey(vec![2]))
        );
        assert_eq!(set.get_address_index(Address([99; 20])), None);
    }

    #[test]
    fn values_iterate_in_sender_order() {
        let mut set = MessageSet::new(View::new(1, 0), val_set(4));
        set.add(prepare_from(Address([3; 20]))).unwrap();
        set.add(prepare_from(Address([1; 20]))).unwrap();
        let senders: Vec<Address> = set.values().map(|m| m.address).collect();
        assert_eq!(senders, vec![Address([1; 20]), Address([3; 20])]);
    }
}
