//! The capability trait the core consumes.

use crate::errors::{BackendError, ProposalError};
use istanbul_types::{
    Address, BlsPublicKey, BlsSignature, Hash, Proposal, Signature, SignerBitfield, ValidatorSet,
};

/// Everything the consensus core needs from the surrounding node.
///
/// The core holds the only reference it needs at construction; the node
/// side never holds a reference back to the core: inbound messages,
/// requests, and final-committed notifications travel through the
/// [`EventSender`](crate::EventSender) handle instead.
///
/// Outbound calls (`broadcast`, `send`, `commit`) must not block the
/// caller: the core's event loop is single-threaded and every handler runs
/// on it.
pub trait Backend: Send + Sync {
    /// This node's validator address.
    fn address(&self) -> Address;

    /// The validator set authorized to sign the block after `proposal`.
    fn validators(&self, proposal: &Proposal) -> ValidatorSet;

    /// The current chain head and the address that proposed it.
    fn last_proposal(&self) -> (Proposal, Address);

    /// Best-effort delivery of `payload` to every validator in `val_set`,
    /// including this node.
    fn broadcast(&self, val_set: &ValidatorSet, payload: Vec<u8>) -> Result<(), BackendError>;

    /// Deliver `payload` to a single validator.
    fn send(&self, payload: Vec<u8>, target: Address) -> Result<(), BackendError>;

    /// Static validity of a proposal. `ProposalError::FutureBlock` reports
    /// how long until the proposal's timestamp is reachable.
    fn verify(&self, proposal: &Proposal) -> Result<(), ProposalError>;

    /// Sign `data` with this node's envelope (ECDSA) key.
    fn sign(&self, data: &[u8]) -> Result<Signature, BackendError>;

    /// Sign `data` with this node's BLS key; used for committed seals.
    fn sign_seal(&self, data: &[u8]) -> Result<BlsSignature, BackendError>;

    /// Check that `signature` over `data` was produced by `address`'s
    /// envelope key.
    fn check_signature(
        &self,
        data: &[u8],
        address: Address,
        signature: &Signature,
    ) -> Result<(), BackendError>;

    /// Check a committed seal under a validator's BLS key.
    fn verify_seal(&self, key: &BlsPublicKey, data: &[u8], seal: &BlsSignature) -> bool;

    /// Aggregate individually verified committed seals into one threshold
    /// signature.
    fn aggregate_seals(&self, seals: &[BlsSignature]) -> Result<BlsSignature, BackendError>;

    /// Hand a decided proposal to the chain, with the inclusion bitmap and
    /// aggregated seal of its committers. The block surfacing as chain head
    /// is reported back as a `FinalCommitted` event.
    fn commit(
        &self,
        proposal: &Proposal,
        signers: SignerBitfield,
        aggregate_seal: BlsSignature,
    ) -> Result<(), BackendError>;

    /// Whether `hash` names a proposal this node has verified and rejected.
    fn has_bad_proposal(&self, hash: Hash) -> bool;
}
