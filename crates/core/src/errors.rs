//! Consensus error identities.
//!
//! The variants are stable: handlers report them by identity and tests
//! distinguish them. A handler error means the offending message is dropped
//! (future messages are backlogged instead); no error escapes the event
//! loop.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the consensus handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// The message's view is behind the current view.
    #[error("old message")]
    OldMessage,
    /// The message's view is ahead of the current view; it was backlogged.
    #[error("future message")]
    FutureMessage,
    /// A PREPARE/COMMIT subject does not match the current view and proposal.
    #[error("inconsistent subject")]
    InconsistentSubject,
    /// The sender is not in the current validator set.
    #[error("unauthorized address")]
    UnauthorizedAddress,
    /// A PRE-PREPARE arrived from a validator that is not the round's proposer.
    #[error("message does not come from proposer")]
    NotFromProposer,
    /// The message failed envelope decoding or signature checking, or the
    /// proposal failed backend verification.
    #[error("invalid message")]
    InvalidMessage,
    /// A COMMIT carried a missing or unverifiable committed seal.
    #[error("invalid committed seal")]
    InvalidCommittedSeal,

    #[error("failed to decode PRE-PREPARE")]
    FailedDecodePreprepare,
    #[error("failed to decode PREPARE")]
    FailedDecodePrepare,
    #[error("failed to decode COMMIT")]
    FailedDecodeCommit,
    #[error("failed to decode ROUND-CHANGE")]
    FailedDecodeRoundChange,

    /// A PRE-PREPARE's round and round-change certificate disagree: a
    /// certificate at round 0, or none above round 0.
    #[error("invalid PRE-PREPARE view")]
    InvalidPreprepareView,

    #[error("prepared certificate contains a message with an invalid code")]
    InvalidPreparedCertificateMsgCode,
    #[error("prepared certificate contains duplicate senders")]
    InvalidPreparedCertificateDuplicate,
    #[error("prepared certificate contains a message with an invalid view")]
    InvalidPreparedCertificateMsgView,
    #[error("prepared certificate digest does not match its proposal")]
    InvalidPreparedCertificateDigestMismatch,
    #[error("prepared certificate contains a message with an invalid signature")]
    InvalidPreparedCertificateMsgSignature,
    #[error("prepared certificate has the wrong number of messages")]
    InvalidPreparedCertificateNumMsgs,

    #[error("round change certificate has the wrong number of messages")]
    InvalidRoundChangeCertificateNumMsgs,
    #[error("round change certificate contains duplicate senders")]
    InvalidRoundChangeCertificateDuplicate,
    #[error("round change certificate contains a message with an invalid code")]
    InvalidRoundChangeCertificateMsgCode,
    #[error("round change certificate contains a message with an invalid view")]
    InvalidRoundChangeCertificateMsgView,
    #[error("round change certificate contains a message with an invalid signature")]
    InvalidRoundChangeCertificateMsgSignature,

    /// The proposal's timestamp is ahead of local time; the PRE-PREPARE was
    /// rescheduled on the future-preprepare timer.
    #[error("future block")]
    FutureBlock,
}

/// Result of `Backend::verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProposalError {
    /// Statically valid, but its timestamp is `wait` ahead of local time.
    #[error("future block, valid in {wait:?}")]
    FutureBlock { wait: Duration },
    /// The proposal failed static validation.
    #[error("invalid proposal")]
    Invalid,
}

/// An infrastructure failure reported by the backend (signing, networking,
/// chain insertion). Carries a description for the log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backend failure: {0}")]
pub struct BackendError(pub String);
