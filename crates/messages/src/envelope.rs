//! The signed message envelope and its codec.

use borsh::{BorshDeserialize, BorshSerialize};
use istanbul_types::{Address, BlsSignature, Hash, Signature};
use thiserror::Error;

/// Errors surfaced by the wire codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes did not decode as the expected type.
    #[error("failed to decode message")]
    Decode,
    /// The envelope signature did not verify against the claimed sender.
    #[error("invalid envelope signature")]
    InvalidSignature,
}

/// Protocol message kinds. The code is part of the signed bytes, so a
/// signature over one kind cannot be replayed as another.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum MsgCode {
    Preprepare,
    Prepare,
    Commit,
    RoundChange,
}

impl MsgCode {
    /// The wire byte for this code, also used as the committed-seal domain
    /// tag.
    pub fn as_byte(self) -> u8 {
        match self {
            MsgCode::Preprepare => 0,
            MsgCode::Prepare => 1,
            MsgCode::Commit => 2,
            MsgCode::RoundChange => 3,
        }
    }
}

/// The preimage of a committed seal: `digest ∥ COMMIT-code`.
///
/// Binding the code byte keeps a PREPARE-phase signature from being
/// replayed as a committed seal.
pub fn commit_seal_payload(digest: Hash) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.extend_from_slice(digest.as_bytes());
    out.push(MsgCode::Commit.as_byte());
    out
}

/// A signed protocol message.
///
/// `msg` is the canonical encoding of the inner body for `code`. The
/// envelope signature covers the encoding of the whole message with the
/// signature field emptied, so it binds `(code, payload, address)` and,
/// for COMMITs, the committed seal.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Message {
    pub code: MsgCode,
    /// Canonical encoding of the inner body.
    pub msg: Vec<u8>,
    /// The sender's address. Must match the key the signature verifies under.
    pub address: Address,
    pub signature: Signature,
    /// BLS seal over [`commit_seal_payload`]; present on COMMITs only.
    pub committed_seal: Option<BlsSignature>,
}

impl Message {
    /// Build an unsigned envelope around an encodable body.
    pub fn new<T: BorshSerialize>(code: MsgCode, body: &T, address: Address) -> Self {
        let msg = borsh::to_vec(body).expect("message body encoding is infallible");
        Self {
            code,
            msg,
            address,
            signature: Signature::empty(),
            committed_seal: None,
        }
    }

    /// The full wire encoding.
    pub fn payload(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("message encoding is infallible")
    }

    /// The bytes the envelope signature covers: the encoding with the
    /// signature emptied. The committed seal stays under the signature.
    pub fn payload_for_signing(&self) -> Vec<u8> {
        let unsigned = Message {
            signature: Signature::empty(),
            ..self.clone()
        };
        borsh::to_vec(&unsigned).expect("message encoding is infallible")
    }

    /// Decode a wire payload and check its envelope signature with the
    /// caller-supplied verifier.
    pub fn from_payload(
        payload: &[u8],
        verify: impl FnOnce(&[u8], Address, &Signature) -> bool,
    ) -> Result<Self, CodecError> {
        let message = Message::try_from_slice(payload).map_err(|_| CodecError::Decode)?;
        let signed_bytes = message.payload_for_signing();
        if !verify(&signed_bytes, message.address, &message.signature) {
            return Err(CodecError::InvalidSignature);
        }
        Ok(message)
    }

    /// Decode the inner body.
    pub fn decode<T: BorshDeserialize>(&self) -> Result<T, CodecError> {
        T::try_from_slice(&self.msg).map_err(|_| CodecError::Decode)
    }
}
