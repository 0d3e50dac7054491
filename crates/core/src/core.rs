//! The consensus state machine.
//!
//! One `Core` value drives one validator through the three-phase protocol.
//! It is owned by a single event-loop task; handlers are synchronous state
//! transitions plus outbound backend calls, so there are no locks on the
//! consensus state itself.

use crate::backlog::Backlog;
use crate::backend::Backend;
use crate::config::Config;
use crate::errors::{BackendError, ConsensusError};
use crate::events::CoreEvent;
use crate::message_set::MessageSet;
use crate::metrics::metrics;
use crate::request::PendingRequests;
use crate::round_change_set::RoundChangeSet;
use crate::round_state::RoundState;
use crate::timers::{round_change_timeout, TimerManager};
use istanbul_messages::{Message, PreparedCertificate, RoundChange, RoundChangeCertificate};
use istanbul_types::{Address, Proposal, SignerBitfield, ValidatorSet, View};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// The per-round protocol state.
///
/// Ordering matters: quorum checks compare against `Prepared` and
/// `Committed`, and `WaitingForNewRound` sorts above everything because a
/// waiting node defers all current-view traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    AcceptRequest,
    Preprepared,
    Prepared,
    Committed,
    WaitingForNewRound,
}

/// The Istanbul consensus core for one validator.
pub struct Core {
    pub(crate) config: Config,
    pub(crate) address: Address,
    pub(crate) state: State,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) val_set: ValidatorSet,
    pub(crate) current: Option<RoundState>,
    pub(crate) round_change_set: RoundChangeSet,
    pub(crate) backlog: Backlog,
    pub(crate) pending_requests: PendingRequests,
    pub(crate) timers: TimerManager,
    /// When this node accepted the sequence's first PRE-PREPARE; feeds the
    /// consensus-duration histogram on sequence advance.
    pub(crate) consensus_started: Option<Instant>,
}

impl Core {
    /// Build a core around a backend. `event_tx` is where the core's own
    /// timers post their events; it must feed the loop that drives this
    /// core.
    pub fn new(config: Config, backend: Arc<dyn Backend>, event_tx: mpsc::Sender<CoreEvent>) -> Self {
        let address = backend.address();
        let (last_proposal, _) = backend.last_proposal();
        let mut val_set = backend.validators(&last_proposal);
        val_set.set_policy(config.proposer_policy);
        let round_change_set = RoundChangeSet::new(val_set.clone());
        Self {
            config,
            address,
            state: State::AcceptRequest,
            backend,
            val_set,
            current: None,
            round_change_set,
            backlog: Backlog::new(),
            pending_requests: PendingRequests::new(),
            timers: TimerManager::new(event_tx),
            consensus_started: None,
        }
    }

    /// Enter the first round. Must run on the event-loop task before any
    /// event is handled.
    pub fn start(&mut self) {
        self.start_new_round(0);
    }

    /// Cancel timers on shutdown. Queued events are simply dropped with the
    /// loop.
    pub fn stop(&mut self) {
        self.timers.cancel_all();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn val_set(&self) -> &ValidatorSet {
        &self.val_set
    }

    /// The working state for the current (sequence, round), if started.
    pub fn round_state(&self) -> Option<&RoundState> {
        self.current.as_ref()
    }

    pub fn current_view(&self) -> View {
        self.current().view()
    }

    pub fn is_proposer(&self) -> bool {
        self.val_set.is_proposer(self.address)
    }

    pub(crate) fn current(&self) -> &RoundState {
        self.current
            .as_ref()
            .expect("round state exists after start")
    }

    pub(crate) fn current_mut(&mut self) -> &mut RoundState {
        self.current
            .as_mut()
            .expect("round state exists after start")
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Outbound
    // ═══════════════════════════════════════════════════════════════════════

    /// Stamp the sender address, sign the envelope, and return the wire
    /// payload.
    pub(crate) fn finalize_message(&self, message: &mut Message) -> Result<Vec<u8>, BackendError> {
        message.address = self.address;
        let data = message.payload_for_signing();
        message.signature = self.backend.sign(&data)?;
        Ok(message.payload())
    }

    /// Sign and broadcast to the whole validator set, this node included.
    pub(crate) fn broadcast(&mut self, mut message: Message) {
        let code = message.code;
        match self.finalize_message(&mut message) {
            Ok(payload) => {
                if let Err(err) = self.backend.broadcast(&self.val_set, payload) {
                    warn!(%err, ?code, "Failed to broadcast message");
                }
            }
            Err(err) => warn!(%err, ?code, "Failed to finalize message"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State transitions
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(old = ?self.state, new = ?state, "State transition");
            self.state = state;
        }
        if state == State::AcceptRequest {
            self.process_pending_requests();
        }
        self.process_backlog();
    }

    /// Finalize the current proposal: aggregate the committed seals and
    /// hand the block to the chain.
    pub(crate) fn commit(&mut self) {
        self.set_state(State::Committed);

        let Some(proposal) = self.current().proposal().cloned() else {
            return;
        };
        let commits = self.current().commits();
        let mut bitmap = SignerBitfield::new(self.val_set.size());
        let mut seals = Vec::with_capacity(commits.size());
        for message in commits.values() {
            // Seals and membership were verified when each COMMIT was
            // accepted; absence here means corrupted state.
            let index = commits
                .get_address_index(message.address)
                .unwrap_or_else(|| panic!("commit: no index for committer {}", message.address));
            let seal = message
                .committed_seal
                .clone()
                .unwrap_or_else(|| panic!("commit: missing seal from {}", message.address));
            bitmap.set(index);
            seals.push(seal);
        }
        let aggregate = self
            .backend
            .aggregate_seals(&seals)
            .unwrap_or_else(|err| panic!("commit: failed to aggregate verified seals: {err}"));

        info!(
            view = %self.current_view(),
            hash = ?proposal.hash(),
            seals = seals.len(),
            "Committing proposal"
        );
        if let Err(err) = self.backend.commit(&proposal, bitmap, aggregate) {
            warn!(%err, "Backend rejected committed proposal, moving to next round");
            self.send_next_round_change();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Round lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// The next PRE-PREPARE's proposal and certificate for a NEW-ROUND
    /// start: the round-change certificate for `round`, plus the proposal
    /// inherited from the highest-round prepared certificate among its
    /// messages (quorum intersection makes same-round certificates agree).
    pub(crate) fn preprepare_for_new_round(
        &self,
        round: u64,
    ) -> Result<(Option<Proposal>, RoundChangeCertificate), ConsensusError> {
        let certificate = self
            .round_change_set
            .get_certificate(round, self.val_set.min_quorum_size())?;
        let mut request = self.current().pending_request().cloned();
        let mut max_round: Option<u64> = None;
        for message in &certificate.round_change_messages {
            let Ok(round_change) = message.decode::<RoundChange>() else {
                continue;
            };
            if !round_change.has_prepared_certificate() {
                continue;
            }
            let Some(view) = round_change.prepared_certificate.view() else {
                continue;
            };
            if max_round.is_none_or(|m| view.round > m) {
                max_round = Some(view.round);
                request = Some(round_change.prepared_certificate.proposal.clone());
            }
        }
        Ok((request, certificate))
    }

    /// Start `round`. Round 0 means a new sequence; a higher round is a
    /// round change within the current sequence.
    pub(crate) fn start_new_round(&mut self, round: u64) {
        let (last_proposal, last_proposer) = self.backend.last_proposal();
        let mut round_change = false;

        if let Some(current) = &self.current {
            let sequence = current.view().sequence;
            if last_proposal.number >= sequence {
                // The chain moved (possibly past us): work on the block one
                // beyond the new head.
                let advanced = last_proposal.number - sequence + 1;
                metrics().sequence_advances.inc_by(advanced as f64);
                if let Some(started) = self.consensus_started.take() {
                    metrics()
                        .consensus_duration
                        .observe(started.elapsed().as_secs_f64());
                }
                trace!(
                    number = last_proposal.number,
                    hash = ?last_proposal.hash(),
                    "Catching up to the latest proposal"
                );
            } else if last_proposal.number + 1 == sequence {
                if round == current.view().round {
                    trace!("Already in the desired round");
                    return;
                }
                if round < current.view().round {
                    warn!(
                        new_round = round,
                        cur_round = current.view().round,
                        "New round should not be smaller than current round"
                    );
                    return;
                }
                round_change = true;
            } else {
                warn!(
                    last = last_proposal.number,
                    sequence, "New sequence should be larger than current sequence"
                );
                return;
            }
        } else {
            trace!("Starting the initial round");
        }

        let (new_view, request, certificate) = if round_change {
            let new_view = View::new(self.current().view().sequence, round);
            match self.preprepare_for_new_round(round) {
                Ok((request, certificate)) => (new_view, request, Some(certificate)),
                Err(err) => {
                    warn!(%err, new_round = round, "Unable to produce round change certificate");
                    return;
                }
            }
        } else {
            let new_view = View::new(last_proposal.number + 1, 0);
            let mut val_set = self.backend.validators(&last_proposal);
            val_set.set_policy(self.config.proposer_policy);
            self.val_set = val_set;
            self.backlog.clear_below(new_view.sequence);
            (new_view, None, None)
        };

        // Round-change votes for lower rounds are no longer actionable.
        self.round_change_set = RoundChangeSet::new(self.val_set.clone());
        self.update_round_state(new_view, round_change);
        self.val_set.calc_proposer(last_proposer, new_view.round);

        metrics().current_sequence.set(new_view.sequence as f64);
        metrics().current_round.set(new_view.round as f64);
        if round_change {
            metrics().round_changes.inc();
        }

        self.set_state(State::AcceptRequest);
        if round_change && self.is_proposer() {
            if let Some(proposal) = request {
                self.send_preprepare(proposal, certificate.unwrap_or_default());
            }
        }
        self.new_round_change_timer();

        debug!(
            view = %new_view,
            proposer = ?self.val_set.proposer().address,
            val_set_size = self.val_set.size(),
            is_proposer = self.is_proposer(),
            "New round"
        );
    }

    /// Move to `WaitingForNewRound`, aiming for round `r`. Monotone: a
    /// lower or equal desired round is ignored.
    pub(crate) fn wait_for_desired_round(&mut self, r: u64) {
        if self.current().desired_round() >= r {
            debug!(
                desired = self.current().desired_round(),
                requested = r,
                "New desired round not greater than current desired round"
            );
            return;
        }
        debug!(
            old_desired = self.current().desired_round(),
            new_desired = r,
            "Waiting for desired round"
        );

        let desired_view = View::new(self.current().view().sequence, r);
        self.set_state(State::WaitingForNewRound);
        self.current_mut().set_desired_round(r);
        let (_, last_proposer) = self.backend.last_proposal();
        self.val_set.calc_proposer(last_proposer, r);
        self.new_round_change_timer_for_view(desired_view);
        self.send_round_change(r);
    }

    fn update_round_state(&mut self, view: View, round_change: bool) {
        if round_change {
            // Same sequence: the pending request, the prepared certificate,
            // and the parent's commits survive the round change.
            let old = self.current.take().expect("round change from a round");
            let (pending_request, prepared_certificate, parent_commits) =
                old.into_round_change_parts();
            self.current = Some(RoundState::new(
                view,
                self.val_set.clone(),
                pending_request,
                prepared_certificate,
                parent_commits,
            ));
        } else {
            // New sequence: the commits that finalized it become the parent
            // commits of the next round state.
            let parent_commits = match self.current.take() {
                Some(old) => old.into_commits(),
                None => MessageSet::new(view, self.val_set.clone()),
            };
            self.current = Some(RoundState::new(
                view,
                self.val_set.clone(),
                None,
                PreparedCertificate::empty(),
                parent_commits,
            ));
        }
    }

    pub(crate) fn new_round_change_timer(&mut self) {
        self.new_round_change_timer_for_view(self.current_view());
    }

    pub(crate) fn new_round_change_timer_for_view(&mut self, view: View) {
        self.timers.cancel_all();
        let timeout = round_change_timeout(&self.config, view.round);
        self.timers.set_round_change_timer(view, timeout);
    }
}
