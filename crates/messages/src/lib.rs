//! Wire messages for the Istanbul consensus protocol.
//!
//! Every protocol message travels as a signed [`Message`] envelope whose
//! inner payload is the canonical (borsh) encoding of one of the bodies:
//!
//! - PRE-PREPARE → [`Preprepare`] (view, proposal, round-change certificate)
//! - PREPARE / COMMIT → [`Subject`] (view, proposal digest)
//! - ROUND-CHANGE → [`RoundChange`] (view, prepared certificate)
//!
//! Certificates are quorum-sized bundles of envelopes:
//! [`PreparedCertificate`] proves some node became Prepared and carries the
//! proposal across rounds; [`RoundChangeCertificate`] authorizes a
//! NEW-ROUND PRE-PREPARE.

mod certificate;
mod envelope;
mod preprepare;
mod round_change;

pub use certificate::{PreparedCertificate, RoundChangeCertificate};
pub use envelope::{commit_seal_payload, CodecError, Message, MsgCode};
pub use preprepare::Preprepare;
pub use round_change::RoundChange;

// The subject is shared with the types crate; re-export it so message
// consumers have one import path for wire content.
pub use istanbul_types::Subject;
