//! Aggregation of ROUND-CHANGE messages across future rounds.

use crate::errors::ConsensusError;
use crate::message_set::MessageSet;
use istanbul_messages::{Message, RoundChangeCertificate};
use istanbul_types::{Address, ValidatorSet, View};
use std::collections::{BTreeMap, HashMap};

/// Tracks which validators want which rounds.
///
/// For each sender only the highest-round message is kept: a validator
/// asking for round 5 implicitly asks for everything below it, so a newer,
/// higher vote supersedes the old one and a lower vote is stale.
#[derive(Debug)]
pub struct RoundChangeSet {
    val_set: ValidatorSet,
    msgs_for_round: BTreeMap<u64, MessageSet>,
    latest_round_for_val: HashMap<Address, u64>,
}

impl RoundChangeSet {
    pub(crate) fn new(val_set: ValidatorSet) -> Self {
        Self {
            val_set,
            msgs_for_round: BTreeMap::new(),
            latest_round_for_val: HashMap::new(),
        }
    }

    /// Insert `message` as its sender's vote for `round`.
    ///
    /// Idempotent per (sender, round). A message below the sender's latest
    /// round is rejected as `OldMessage`; a higher one replaces it.
    pub(crate) fn add(&mut self, round: u64, message: Message) -> Result<(), ConsensusError> {
        let address = message.address;
        if !self.val_set.contains(address) {
            return Err(ConsensusError::UnauthorizedAddress);
        }
        if let Some(&previous) = self.latest_round_for_val.get(&address) {
            if previous > round {
                return Err(ConsensusError::OldMessage);
            }
            if previous < round {
                if let Some(set) = self.msgs_for_round.get_mut(&previous) {
                    set.remove(address);
                    if set.size() == 0 {
                        self.msgs_for_round.remove(&previous);
                    }
                }
            }
        }
        self.latest_round_for_val.insert(address, round);
        self.msgs_for_round
            .entry(round)
            .or_insert_with(|| MessageSet::new(View::new(0, round), self.val_set.clone()))
            .add(message)
    }

    /// Number of distinct senders whose latest vote is exactly `round`.
    pub fn size_for_round(&self, round: u64) -> usize {
        self.msgs_for_round.get(&round).map_or(0, |s| s.size())
    }

    /// The largest round R such that at least `threshold` distinct senders
    /// have asked for round R or higher. `None` if no such round exists.
    pub fn max_round(&self, threshold: usize) -> Option<u64> {
        if threshold == 0 {
            return None;
        }
        let mut acc = 0;
        for (&round, set) in self.msgs_for_round.iter().rev() {
            acc += set.size();
            if acc >= threshold {
                return Some(round);
            }
        }
        None
    }

    /// Drop votes for rounds below `round`.
    pub(crate) fn clear(&mut self, round: u64) {
        let latest_round_for_val = &mut self.latest_round_for_val;
        self.msgs_for_round.retain(|&r, set| {
            if r < round || set.size() == 0 {
                for message in set.values() {
                    latest_round_for_val.remove(&message.address);
                }
                false
            } else {
                true
            }
        });
    }

    /// Assemble a certificate of exactly `quorum` messages for `round` (one
    /// per sender, each at `round` or higher).
    pub(crate) fn get_certificate(
        &self,
        round: u64,
        quorum: usize,
    ) -> Result<RoundChangeCertificate, ConsensusError> {
        let mut messages = Vec::with_capacity(quorum);
        for (_, set) in self.msgs_for_round.range(round..) {
            for message in set.values() {
                if messages.len() == quorum {
                    break;
                }
                messages.push(message.clone());
            }
        }
        if messages.len() < quorum {
            return Err(ConsensusError::InvalidRoundChangeCertificateNumMsgs);
        }
        Ok(RoundChangeCertificate {
            round_change_messages: messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istanbul_messages::{MsgCode, PreparedCertificate, RoundChange};
    use istanbul_types::{BlsPublicKey, ProposerPolicy, Validator};
    use tracing_test::traced_test;

    fn val_set(n: u8) -> ValidatorSet {
        let validators = (0..n)
            .map(|i| Validator::new(Address([i + 1; 20]), BlsPublicKey(vec![i])))
            .collect();
        ValidatorSet::new(validators, ProposerPolicy::RoundRobin)
    }

    fn round_change_from(address: Address, round: u64) -> Message {
        let body = RoundChange::new(View::new(1, round), PreparedCertificate::empty());
        Message::new(MsgCode::RoundChange, &body, address)
    }

    #[traced_test]
    #[test]
    fn add_is_idempotent_per_sender_and_round() {
        let vals = val_set(4);
        let mut set = RoundChangeSet::new(vals.clone());

        for (i, v) in vals.list().iter().enumerate() {
            set.add(1, round_change_from(v.address, 1)).unwrap();
            assert_eq!(set.size_for_round(1), i + 1);
        }
        // Adding again leaves the sizes unchanged.
        for v in vals.list() {
            set.add(1, round_change_from(v.address, 1)).unwrap();
            assert_eq!(set.size_for_round(1), vals.size());
        }
    }

    #[traced_test]
    #[test]
    fn higher_round_replaces_and_lower_round_is_old() {
        let vals = val_set(4);
        let mut set = RoundChangeSet::new(vals.clone());
        let addr = vals.list()[0].address;

        set.add(2, round_change_from(addr, 2)).unwrap();
        set.add(5, round_change_from(addr, 5)).unwrap();
        assert_eq!(set.size_for_round(2), 0);
        assert_eq!(set.size_for_round(5), 1);

        let err = set.add(3, round_change_from(addr, 3)).unwrap_err();
        assert_eq!(err, ConsensusError::OldMessage);
        assert_eq!(set.size_for_round(5), 1);
    }

    #[traced_test]
    #[test]
    fn max_round_is_non_increasing_in_threshold() {
        let vals = val_set(4);
        let mut set = RoundChangeSet::new(vals.clone());

        // Validators at rounds 0, 1, 2, 3 respectively.
        for (i, v) in vals.list().iter().enumerate() {
            set.add(i as u64, round_change_from(v.address, i as u64))
                .unwrap();
        }

        // threshold k is satisfied by the k highest-round senders.
        assert_eq!(set.max_round(1), Some(3));
        assert_eq!(set.max_round(2), Some(2));
        assert_eq!(set.max_round(3), Some(1));
        assert_eq!(set.max_round(4), Some(0));

        // More senders than exist: no round qualifies.
        assert_eq!(set.max_round(5), None);
        assert_eq!(set.max_round(0), None);
    }

    #[traced_test]
    #[test]
    fn max_round_with_all_on_one_round() {
        let vals = val_set(4);
        let mut set = RoundChangeSet::new(vals.clone());
        for v in vals.list() {
            set.add(1, round_change_from(v.address, 1)).unwrap();
        }
        for threshold in 1..=4 {
            assert_eq!(set.max_round(threshold), Some(1));
        }
        assert_eq!(set.max_round(5), None);
    }

    #[traced_test]
    #[test]
    fn clear_drops_only_lower_rounds() {
        let vals = val_set(4);
        let mut set = RoundChangeSet::new(vals.clone());
        for v in vals.list() {
            set.add(1, round_change_from(v.address, 1)).unwrap();
        }

        set.clear(1);
        assert_eq!(set.size_for_round(1), vals.size());

        set.clear(2);
        assert_eq!(set.size_for_round(1), 0);
        // Cleared senders may vote again.
        set.add(3, round_change_from(vals.list()[0].address, 3))
            .unwrap();
        assert_eq!(set.size_for_round(3), 1);
    }

    #[traced_test]
    #[test]
    fn certificate_has_exactly_quorum_messages_at_or_above_round() {
        let vals = val_set(4);
        let mut set = RoundChangeSet::new(vals.clone());
        for (i, v) in vals.list().iter().enumerate() {
            let round = 2 + i as u64;
            set.add(round, round_change_from(v.address, round)).unwrap();
        }

        let cert = set.get_certificate(2, 3).unwrap();
        assert_eq!(cert.round_change_messages.len(), 3);

        // Not enough senders at or above round 5.
        let err = set.get_certificate(5, 3).unwrap_err();
        assert_eq!(err, ConsensusError::InvalidRoundChangeCertificateNumMsgs);
    }
}
