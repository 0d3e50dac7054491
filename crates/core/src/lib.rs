//! Istanbul BFT consensus core.
//!
//! This crate drives a committee of validators through agreement on a
//! sequence of block proposals. For each block height (*sequence*) it runs
//! one or more *rounds* of a three-phase commit protocol and moves to the
//! next round through an explicit round-change protocol when progress
//! stalls. With `n ≥ 3f + 1` validators it tolerates `f` Byzantine members.
//!
//! # Architecture
//!
//! The core is a synchronous state machine owned by a single event-loop
//! task ([`Engine`]). Network delivery, the local block producer, and the
//! timers are concurrent producers that only *enqueue* [`CoreEvent`]s
//! through an [`EventSender`]; they never touch consensus state. Everything
//! the core needs from the node (signing, proposal verification,
//! networking, chain insertion) sits behind the [`Backend`] trait.
//!
//! ```text
//! network ─┐
//! producer ─┤→ EventSender → event loop → Core handlers → Backend calls
//! timers  ─┘
//! ```
//!
//! # Protocol flow
//!
//! - The round's proposer broadcasts PRE-PREPARE for its pending request.
//! - Replicas verify the proposal, accept it, and broadcast PREPARE.
//! - At a quorum of PREPAREs a node freezes its prepared certificate and
//!   broadcasts COMMIT with a BLS committed seal.
//! - At a quorum of COMMITs the node aggregates the seals and hands the
//!   block to the chain via `Backend::commit`.
//! - If a round stalls, ROUND-CHANGE messages (carrying prepared
//!   certificates so an already-prepared proposal survives) gather a quorum
//!   that authorizes the next round's proposer.
//!
//! # Terminology
//!
//! - **Sequence**: the block height being agreed on. Strictly sequential.
//! - **Round**: attempt number within a sequence; timeouts with
//!   exponential backoff force round changes.
//! - **View**: the (sequence, round) pair.
//! - **Quorum**: ⌊2n/3⌋ + 1 validators; any two quorums intersect in an
//!   honest node, which is what makes prepared-certificate forwarding safe.

mod backend;
mod backlog;
mod certificates;
mod commit;
mod config;
mod core;
mod engine;
mod errors;
mod events;
mod handler;
mod message_set;
mod metrics;
pub mod mocks;
mod prepare;
mod preprepare;
mod request;
mod round_change;
mod round_change_set;
mod round_state;
mod timers;

pub use backend::Backend;
pub use config::Config;
pub use crate::core::{Core, State};
pub use engine::{Engine, EngineHandle};
pub use errors::{BackendError, ConsensusError, ProposalError};
pub use events::{CoreEvent, CoreStopped, EventSender};
pub use message_set::MessageSet;
pub use metrics::{metrics, Metrics};
pub use round_change_set::RoundChangeSet;
pub use round_state::RoundState;
pub use timers::round_change_timeout;
