//! Opaque signature carriers.
//!
//! The core never runs cryptography itself: envelope signatures (ECDSA in
//! production) and committed seals (BLS) are produced and checked by the
//! node's backend. These types carry the bytes through the protocol and the
//! wire codec without binding a cipher suite.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// An envelope signature over `(code, payload, address)`.
#[derive(Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// The empty signature, substituted into the envelope when computing
    /// the bytes that get signed.
    pub fn empty() -> Self {
        Signature(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// A BLS signature: either a single committed seal over
/// `digest ∥ COMMIT-code` or the aggregate of many such seals.
#[derive(Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct BlsSignature(pub Vec<u8>);

impl BlsSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({} bytes)", self.0.len())
    }
}

/// A validator's BLS public key, published alongside its address.
#[derive(Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct BlsPublicKey(pub Vec<u8>);

impl BlsPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({} bytes)", self.0.len())
    }
}
