//! Core types for Istanbul BFT consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: [`Address`], [`Hash`]
//! - **Protocol positions**: [`View`] (sequence + round), [`Subject`]
//! - **Proposals**: [`Proposal`], the consensus-visible view of a block
//! - **Membership**: [`Validator`], [`ValidatorSet`], proposer policies
//! - **Aggregation**: [`SignerBitfield`] for the committed-seal bitmap
//! - **Signatures**: opaque [`Signature`] / [`BlsSignature`] carriers
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crate, making it the foundation layer.
//! Cryptographic operations never happen here: signatures are opaque byte
//! carriers that the node's backend produces and checks.

mod bitfield;
mod crypto;
mod primitives;
mod proposal;
mod validator;
mod view;

pub use bitfield::SignerBitfield;
pub use crypto::{BlsPublicKey, BlsSignature, Signature};
pub use primitives::{Address, Hash};
pub use proposal::Proposal;
pub use validator::{ProposerPolicy, Validator, ValidatorSet};
pub use view::{Subject, View};
