//! Deterministic test doubles for the consensus core.
//!
//! `MockBackend` implements [`Backend`] with real ed25519 envelope
//! signatures and keyed-digest committed seals (the production BLS suite is
//! backend-owned and out of scope here). Keys derive from seeds, so every
//! run produces the same validator set.
//!
//! Outbound traffic is recorded, not delivered: tests route the recorded
//! payloads themselves, which makes partitions and reordering trivial to
//! express.

use crate::backend::Backend;
use crate::config::Config;
use crate::core::Core;
use crate::errors::{BackendError, ProposalError};
use crate::events::{CoreEvent, EventSender};
use borsh::BorshSerialize;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use istanbul_messages::{
    commit_seal_payload, Message, MsgCode, PreparedCertificate, Preprepare, RoundChange,
    RoundChangeCertificate, Subject,
};
use istanbul_types::{
    Address, BlsPublicKey, BlsSignature, Hash, Proposal, ProposerPolicy, Signature,
    SignerBitfield, Validator, ValidatorSet, View,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One validator's deterministic key material.
#[derive(Clone)]
pub struct MockKeyring {
    signing_key: SigningKey,
    pub address: Address,
    pub bls_public_key: BlsPublicKey,
}

impl MockKeyring {
    pub fn from_seed(seed: u64) -> Self {
        let digest = blake3::hash(&seed.to_le_bytes());
        let signing_key = SigningKey::from_bytes(digest.as_bytes());
        let key_digest = blake3::hash(signing_key.verifying_key().as_bytes());
        let address = Address::from_slice(&key_digest.as_bytes()[..20]);
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"bls-public-key");
        hasher.update(address.as_bytes());
        let bls_public_key = BlsPublicKey(hasher.finalize().as_bytes().to_vec());
        Self {
            signing_key,
            address,
            bls_public_key,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature(self.signing_key.sign(data).to_bytes().to_vec())
    }

    /// This validator's committed seal over `data`.
    pub fn seal(&self, data: &[u8]) -> BlsSignature {
        mock_seal(&self.bls_public_key, data)
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.address, self.bls_public_key.clone())
    }
}

/// Keyed digest standing in for a BLS seal.
pub fn mock_seal(key: &BlsPublicKey, data: &[u8]) -> BlsSignature {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"seal");
    hasher.update(key.as_bytes());
    hasher.update(data);
    BlsSignature(hasher.finalize().as_bytes().to_vec())
}

/// Digest of all seals standing in for BLS aggregation.
pub fn mock_aggregate(seals: &[BlsSignature]) -> BlsSignature {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"aggregate");
    for seal in seals {
        hasher.update(seal.as_bytes());
    }
    BlsSignature(hasher.finalize().as_bytes().to_vec())
}

/// The shared identity directory for a mock committee.
pub struct MockRegistry {
    keyrings: Vec<MockKeyring>,
}

impl MockRegistry {
    /// A committee of `n` validators with seeds `0..n`.
    pub fn new(n: usize) -> Arc<Self> {
        Arc::new(Self {
            keyrings: (0..n as u64).map(MockKeyring::from_seed).collect(),
        })
    }

    pub fn keyring(&self, index: usize) -> &MockKeyring {
        &self.keyrings[index]
    }

    pub fn keyring_by_address(&self, address: Address) -> Option<&MockKeyring> {
        self.keyrings.iter().find(|k| k.address == address)
    }

    pub fn val_set(&self, policy: ProposerPolicy) -> ValidatorSet {
        ValidatorSet::new(self.keyrings.iter().map(|k| k.validator()).collect(), policy)
    }
}

/// A recorded outbound network call.
#[derive(Debug, Clone)]
pub enum Outbound {
    Broadcast { payload: Vec<u8> },
    Send { payload: Vec<u8>, target: Address },
}

/// A recorded `Backend::commit` call.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub proposal: Proposal,
    pub signers: SignerBitfield,
    pub aggregate_seal: BlsSignature,
}

/// A deterministic in-memory backend for one validator.
pub struct MockBackend {
    registry: Arc<MockRegistry>,
    keyring: MockKeyring,
    policy: ProposerPolicy,
    outbound: Mutex<Vec<Outbound>>,
    committed: Mutex<Vec<CommitRecord>>,
    last_proposal: Mutex<(Proposal, Address)>,
    bad_proposals: Mutex<HashSet<Hash>>,
    future_blocks: Mutex<HashMap<Hash, Duration>>,
    loopback: Mutex<Option<EventSender>>,
}

/// The chain head every mock backend starts from.
pub fn genesis() -> Proposal {
    Proposal::new(0, Hash::ZERO, 0, Vec::new())
}

impl MockBackend {
    pub fn new(registry: Arc<MockRegistry>, index: usize) -> Arc<Self> {
        let keyring = registry.keyring(index).clone();
        Arc::new(Self {
            registry,
            keyring,
            policy: ProposerPolicy::RoundRobin,
            outbound: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            last_proposal: Mutex::new((genesis(), Address::ZERO)),
            bad_proposals: Mutex::new(HashSet::new()),
            future_blocks: Mutex::new(HashMap::new()),
            loopback: Mutex::new(None),
        })
    }

    /// Route this backend's broadcasts back into its own core's queue.
    /// Without a loopback, the test harness routes recorded payloads.
    pub fn set_loopback(&self, sender: EventSender) {
        *self.loopback.lock().unwrap() = Some(sender);
    }

    pub fn keyring(&self) -> &MockKeyring {
        &self.keyring
    }

    /// Drain the recorded outbound calls.
    pub fn take_outbound(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.outbound.lock().unwrap())
    }

    pub fn committed(&self) -> Vec<CommitRecord> {
        self.committed.lock().unwrap().clone()
    }

    /// Mark a proposal as failing static verification.
    pub fn mark_bad(&self, hash: Hash) {
        self.bad_proposals.lock().unwrap().insert(hash);
    }

    /// Make the next verification of `hash` report a future block.
    pub fn set_future_block(&self, hash: Hash, wait: Duration) {
        self.future_blocks.lock().unwrap().insert(hash, wait);
    }

    pub fn set_chain_head(&self, proposal: Proposal, proposer: Address) {
        *self.last_proposal.lock().unwrap() = (proposal, proposer);
    }
}

impl Backend for MockBackend {
    fn address(&self) -> Address {
        self.keyring.address
    }

    fn validators(&self, _proposal: &Proposal) -> ValidatorSet {
        self.registry.val_set(self.policy)
    }

    fn last_proposal(&self) -> (Proposal, Address) {
        self.last_proposal.lock().unwrap().clone()
    }

    fn broadcast(&self, _val_set: &ValidatorSet, payload: Vec<u8>) -> Result<(), BackendError> {
        if let Some(sender) = &*self.loopback.lock().unwrap() {
            let _ = sender.try_send(CoreEvent::MessageReceived {
                payload: payload.clone(),
            });
        }
        self.outbound
            .lock()
            .unwrap()
            .push(Outbound::Broadcast { payload });
        Ok(())
    }

    fn send(&self, payload: Vec<u8>, target: Address) -> Result<(), BackendError> {
        self.outbound
            .lock()
            .unwrap()
            .push(Outbound::Send { payload, target });
        Ok(())
    }

    fn verify(&self, proposal: &Proposal) -> Result<(), ProposalError> {
        let hash = proposal.hash();
        if self.bad_proposals.lock().unwrap().contains(&hash) {
            return Err(ProposalError::Invalid);
        }
        // Future-block verdicts are one-shot: the retry succeeds, as it
        // would once wall time catches up.
        if let Some(wait) = self.future_blocks.lock().unwrap().remove(&hash) {
            return Err(ProposalError::FutureBlock { wait });
        }
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, BackendError> {
        Ok(self.keyring.sign(data))
    }

    fn sign_seal(&self, data: &[u8]) -> Result<BlsSignature, BackendError> {
        Ok(self.keyring.seal(data))
    }

    fn check_signature(
        &self,
        data: &[u8],
        address: Address,
        signature: &Signature,
    ) -> Result<(), BackendError> {
        let keyring = self
            .registry
            .keyring_by_address(address)
            .ok_or_else(|| BackendError(format!("unknown signer {address}")))?;
        let bytes: [u8; 64] = signature
            .as_bytes()
            .try_into()
            .map_err(|_| BackendError("malformed signature".into()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        keyring
            .verifying_key()
            .verify(data, &signature)
            .map_err(|err| BackendError(err.to_string()))
    }

    fn verify_seal(&self, key: &BlsPublicKey, data: &[u8], seal: &BlsSignature) -> bool {
        mock_seal(key, data) == *seal
    }

    fn aggregate_seals(&self, seals: &[BlsSignature]) -> Result<BlsSignature, BackendError> {
        if seals.is_empty() {
            return Err(BackendError("no seals to aggregate".into()));
        }
        Ok(mock_aggregate(seals))
    }

    fn commit(
        &self,
        proposal: &Proposal,
        signers: SignerBitfield,
        aggregate_seal: BlsSignature,
    ) -> Result<(), BackendError> {
        self.committed.lock().unwrap().push(CommitRecord {
            proposal: proposal.clone(),
            signers,
            aggregate_seal,
        });
        // The chain accepts immediately; tests deliver FinalCommitted when
        // they want the core to advance.
        self.set_chain_head(proposal.clone(), Address::ZERO);
        Ok(())
    }

    fn has_bad_proposal(&self, hash: Hash) -> bool {
        self.bad_proposals.lock().unwrap().contains(&hash)
    }
}

/// A started core over a fresh `n`-validator committee. The returned
/// receiver carries the core's timer events; tests usually inject timeouts
/// directly instead of waiting for them.
///
/// Must run under a tokio runtime (starting a round arms a timer task).
pub fn test_core(
    n: usize,
    index: usize,
) -> (
    Core,
    Arc<MockBackend>,
    Arc<MockRegistry>,
    tokio::sync::mpsc::Receiver<CoreEvent>,
) {
    let registry = MockRegistry::new(n);
    let backend = MockBackend::new(Arc::clone(&registry), index);
    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let mut core = Core::new(
        Config::default(),
        Arc::clone(&backend) as Arc<dyn Backend>,
        tx,
    );
    core.start();
    (core, backend, registry, rx)
}

// ═══════════════════════════════════════════════════════════════════════════
// Signed wire-message builders
// ═══════════════════════════════════════════════════════════════════════════

/// Envelope, sign, and encode a message body as `keyring` would.
pub fn build_message<T: BorshSerialize>(
    keyring: &MockKeyring,
    code: MsgCode,
    body: &T,
    seal_digest: Option<Hash>,
) -> Vec<u8> {
    let mut message = Message::new(code, body, keyring.address);
    if let Some(digest) = seal_digest {
        message.committed_seal = Some(keyring.seal(&commit_seal_payload(digest)));
    }
    message.signature = keyring.sign(&message.payload_for_signing());
    message.payload()
}

pub fn build_preprepare(keyring: &MockKeyring, view: View, proposal: Proposal) -> Vec<u8> {
    build_message(
        keyring,
        MsgCode::Preprepare,
        &Preprepare::new(view, proposal),
        None,
    )
}

pub fn build_preprepare_with_certificate(
    keyring: &MockKeyring,
    view: View,
    proposal: Proposal,
    certificate: RoundChangeCertificate,
) -> Vec<u8> {
    build_message(
        keyring,
        MsgCode::Preprepare,
        &Preprepare::with_certificate(view, proposal, certificate),
        None,
    )
}

pub fn build_prepare(keyring: &MockKeyring, view: View, digest: Hash) -> Vec<u8> {
    build_message(keyring, MsgCode::Prepare, &Subject { view, digest }, None)
}

pub fn build_commit(keyring: &MockKeyring, view: View, digest: Hash) -> Vec<u8> {
    build_message(
        keyring,
        MsgCode::Commit,
        &Subject { view, digest },
        Some(digest),
    )
}

pub fn build_round_change(
    keyring: &MockKeyring,
    view: View,
    certificate: PreparedCertificate,
) -> Vec<u8> {
    build_message(
        keyring,
        MsgCode::RoundChange,
        &RoundChange::new(view, certificate),
        None,
    )
}
