//! Per-(sequence, round) working state.

use crate::errors::ConsensusError;
use crate::message_set::MessageSet;
use istanbul_messages::{Message, PreparedCertificate, Preprepare};
use istanbul_types::{Proposal, Subject, ValidatorSet, View};
use std::collections::BTreeSet;

/// The mutable working set for one (sequence, round).
///
/// Created at round start and replaced on every round change or sequence
/// advance. `desired_round` can run ahead of `view.round` while the node
/// waits for a round change to gather quorum.
#[derive(Debug)]
pub struct RoundState {
    view: View,
    desired_round: u64,
    preprepare: Option<Preprepare>,
    prepares: MessageSet,
    commits: MessageSet,
    /// COMMITs for the previous, already-committed sequence. They arrive
    /// late but still strengthen the parent's aggregated seal, so the node
    /// can pick them up when it assembles the next block.
    parent_commits: MessageSet,
    pending_request: Option<Proposal>,
    prepared_certificate: PreparedCertificate,
}

impl RoundState {
    pub(crate) fn new(
        view: View,
        val_set: ValidatorSet,
        pending_request: Option<Proposal>,
        prepared_certificate: PreparedCertificate,
        parent_commits: MessageSet,
    ) -> Self {
        Self {
            view,
            desired_round: view.round,
            preprepare: None,
            prepares: MessageSet::new(view, val_set.clone()),
            commits: MessageSet::new(view, val_set),
            parent_commits,
            pending_request,
            prepared_certificate,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// The round this node is trying to reach. Always ≥ `view.round`.
    pub fn desired_round(&self) -> u64 {
        self.desired_round
    }

    pub(crate) fn set_desired_round(&mut self, round: u64) {
        debug_assert!(round >= self.desired_round, "desired round regression");
        self.desired_round = round;
    }

    pub fn preprepare(&self) -> Option<&Preprepare> {
        self.preprepare.as_ref()
    }

    /// The proposal accepted for this round, if any.
    pub fn proposal(&self) -> Option<&Proposal> {
        self.preprepare.as_ref().map(|p| &p.proposal)
    }

    /// The subject PREPAREs and COMMITs for this round must carry.
    pub fn subject(&self) -> Option<Subject> {
        self.proposal().map(|proposal| Subject {
            view: self.view,
            digest: proposal.hash(),
        })
    }

    /// Record the accepted PRE-PREPARE.
    ///
    /// At most one proposal is ever accepted per (sequence, round); a
    /// second with a different hash means corrupted state, not peer
    /// misbehavior, and panics.
    pub(crate) fn set_preprepare(&mut self, preprepare: Preprepare) {
        if let Some(existing) = &self.preprepare {
            assert_eq!(
                existing.proposal.hash(),
                preprepare.proposal.hash(),
                "conflicting proposal accepted at {}",
                self.view
            );
        }
        self.preprepare = Some(preprepare);
    }

    pub fn prepares(&self) -> &MessageSet {
        &self.prepares
    }

    pub fn commits(&self) -> &MessageSet {
        &self.commits
    }

    pub fn parent_commits(&self) -> &MessageSet {
        &self.parent_commits
    }

    pub(crate) fn add_prepare(&mut self, message: Message) -> Result<(), ConsensusError> {
        self.prepares.add(message)
    }

    pub(crate) fn add_commit(&mut self, message: Message) -> Result<(), ConsensusError> {
        self.commits.add(message)
    }

    pub(crate) fn add_parent_commit(&mut self, message: Message) -> Result<(), ConsensusError> {
        self.parent_commits.add(message)
    }

    pub fn pending_request(&self) -> Option<&Proposal> {
        self.pending_request.as_ref()
    }

    pub(crate) fn set_pending_request(&mut self, proposal: Proposal) {
        self.pending_request = Some(proposal);
    }

    /// The best prepared certificate known for this sequence. Empty until
    /// this node first reaches Prepared; carried forward across rounds.
    pub fn prepared_certificate(&self) -> &PreparedCertificate {
        &self.prepared_certificate
    }

    pub(crate) fn set_prepared_certificate(&mut self, certificate: PreparedCertificate) {
        // Certificates are only frozen at quorum for the current round, so
        // the view can never regress within a sequence.
        debug_assert!(
            self.prepared_certificate.is_empty()
                || certificate.view() >= self.prepared_certificate.view(),
            "prepared certificate regression at {}",
            self.view
        );
        self.prepared_certificate = certificate;
    }

    /// Distinct senders across the PREPARE and COMMIT stores. A COMMIT
    /// implies its sender prepared, so both count toward the prepared
    /// quorum.
    pub fn prepare_or_commit_size(&self) -> usize {
        let mut senders: BTreeSet<_> = self.prepares.values().map(|m| m.address).collect();
        senders.extend(self.commits.values().map(|m| m.address));
        senders.len()
    }

    /// Decompose for a round change within the same sequence: the pieces
    /// that survive into the next round's state.
    pub(crate) fn into_round_change_parts(
        self,
    ) -> (Option<Proposal>, PreparedCertificate, MessageSet) {
        (
            self.pending_request,
            self.prepared_certificate,
            self.parent_commits,
        )
    }

    /// Decompose on sequence advance: this round's commits become the next
    /// sequence's parent commits.
    pub(crate) fn into_commits(self) -> MessageSet {
        self.commits
    }

    /// Freeze a certificate of exactly `quorum` PREPARE/COMMIT messages for
    /// the accepted proposal, or `None` if quorum has not been reached.
    pub(crate) fn create_prepared_certificate(&self, quorum: usize) -> Option<PreparedCertificate> {
        let proposal = self.proposal()?.clone();
        let mut seen = BTreeSet::new();
        let mut messages = Vec::with_capacity(quorum);
        for message in self.prepares.values().chain(self.commits.values()) {
            if messages.len() == quorum {
                break;
            }
            if seen.insert(message.address) {
                messages.push(message.clone());
            }
        }
        if messages.len() < quorum {
            return None;
        }
        Some(PreparedCertificate {
            proposal,
            prepare_or_commit_messages: messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istanbul_messages::MsgCode;
    use istanbul_types::{Address, BlsPublicKey, Hash, ProposerPolicy, Validator};

    fn val_set(n: u8) -> ValidatorSet {
        let validators = (0..n)
            .map(|i| Validator::new(Address([i + 1; 20]), BlsPublicKey(vec![i])))
            .collect();
        ValidatorSet::new(validators, ProposerPolicy::RoundRobin)
    }

    fn state_with_proposal() -> (RoundState, Proposal) {
        let view = View::new(1, 0);
        let vals = val_set(4);
        let mut state = RoundState::new(
            view,
            vals.clone(),
            None,
            PreparedCertificate::empty(),
            MessageSet::new(view, vals),
        );
        let proposal = Proposal::new(1, Hash::ZERO, 0, vec![1]);
        state.set_preprepare(Preprepare::new(view, proposal.clone()));
        (state, proposal)
    }

    fn subject_msg(code: MsgCode, state: &RoundState, sender: Address) -> Message {
        Message::new(code, &state.subject().unwrap(), sender)
    }

    #[test]
    fn subject_names_the_accepted_proposal() {
        let (state, proposal) = state_with_proposal();
        let subject = state.subject().unwrap();
        assert_eq!(subject.view, View::new(1, 0));
        assert_eq!(subject.digest, proposal.hash());
    }

    #[test]
    #[should_panic(expected = "conflicting proposal")]
    fn conflicting_second_proposal_is_fatal() {
        let (mut state, _) = state_with_proposal();
        let other = Proposal::new(1, Hash::ZERO, 0, vec![2]);
        state.set_preprepare(Preprepare::new(View::new(1, 0), other));
    }

    #[test]
    fn prepare_or_commit_size_deduplicates_senders() {
        let (mut state, _) = state_with_proposal();
        state
            .add_prepare(subject_msg(MsgCode::Prepare, &state, Address([1; 20])))
            .unwrap();
        state
            .add_prepare(subject_msg(MsgCode::Prepare, &state, Address([2; 20])))
            .unwrap();
        // The same sender's COMMIT must not double-count.
        state
            .add_commit(subject_msg(MsgCode::Commit, &state, Address([2; 20])))
            .unwrap();
        state
            .add_commit(subject_msg(MsgCode::Commit, &state, Address([3; 20])))
            .unwrap();
        assert_eq!(state.prepare_or_commit_size(), 3);
    }

    #[test]
    fn certificate_takes_exactly_quorum_messages() {
        let (mut state, proposal) = state_with_proposal();
        for i in 1..=4u8 {
            state
                .add_prepare(subject_msg(MsgCode::Prepare, &state, Address([i; 20])))
                .unwrap();
        }
        let cert = state.create_prepared_certificate(3).unwrap();
        assert_eq!(cert.prepare_or_commit_messages.len(), 3);
        assert_eq!(cert.proposal, proposal);
        assert_eq!(cert.view(), Some(View::new(1, 0)));

        assert!(state.create_prepared_certificate(5).is_none());
    }

    #[test]
    fn desired_round_starts_at_view_round() {
        let (state, _) = state_with_proposal();
        assert_eq!(state.desired_round(), 0);
    }
}
