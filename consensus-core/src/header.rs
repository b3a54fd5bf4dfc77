//! `Header` and `ProposedHeader` (spec §3).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scheme::{ConsensusScheme, Signature};
use crate::validator::{Digest, PubKey, ValidatorSet};
use crate::vote::CommitProof;

/// Free-form annotations the application may attach to a header or a
/// proposal without the consensus core interpreting them.
pub type Annotations = Vec<u8>;

/// An immutable, hash-identified block header.
///
/// `hash` is derived by the scheme's `hash_block` over a canonical
/// encoding of every other field; it is computed once at construction and
/// never recomputed, so a `Header` is cheap to pass by value (wrapped in
/// `Arc` where it's shared across views).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub height: u64,
    pub prev_block_hash: Digest,
    pub prev_commit_proof: Option<CommitProof>,
    pub validator_set_hash: Digest,
    pub next_validator_set_hash: Digest,
    pub data_id: String,
    pub prev_app_state_hash: Digest,
    pub annotations: Annotations,
    pub hash: Digest,
}

impl Header {
    /// Build a header and stamp its hash. `validator_set`/`next_validator_set`
    /// are hashed in (not stored by value) so the header's wire size stays
    /// bounded regardless of validator-set size.
    pub fn new<S: ConsensusScheme>(
        scheme: &S,
        height: u64,
        prev_block_hash: Digest,
        prev_commit_proof: Option<CommitProof>,
        validator_set: &ValidatorSet,
        next_validator_set: &ValidatorSet,
        data_id: String,
        prev_app_state_hash: Digest,
        annotations: Annotations,
    ) -> Self {
        let mut unhashed = Self {
            height,
            prev_block_hash,
            prev_commit_proof,
            validator_set_hash: validator_set.pub_key_hash(),
            next_validator_set_hash: next_validator_set.pub_key_hash(),
            data_id,
            prev_app_state_hash,
            annotations,
            hash: Digest::ZERO,
        };
        let bytes = unhashed.canonical_bytes_without_hash();
        unhashed.hash = scheme.hash_block(&bytes);
        unhashed
    }

    fn canonical_bytes_without_hash(&self) -> Vec<u8> {
        // Deterministic, order-stable encoding. JSON is adequate here: it
        // is never interpreted by a peer, only hashed and signed locally
        // and re-derived by every verifier from the same struct layout.
        serde_json::to_vec(&(
            self.height,
            &self.prev_block_hash,
            &self.prev_commit_proof,
            &self.validator_set_hash,
            &self.next_validator_set_hash,
            &self.data_id,
            &self.prev_app_state_hash,
            &self.annotations,
        ))
        .expect("header fields are always serializable")
    }

    /// Recompute the hash from the current fields and compare against the
    /// stored one. Used by the Mirror to reject a header whose claimed
    /// hash doesn't match its content (`BadBlockHash`).
    pub fn verify_hash<S: ConsensusScheme>(&self, scheme: &S) -> bool {
        scheme.hash_block(&self.canonical_bytes_without_hash()) == self.hash
    }
}

/// A header as broadcast by its proposer for a specific round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedHeader {
    pub header: Arc<Header>,
    pub round: u32,
    pub proposer_pub_key: PubKey,
    pub proposal_annotations: Annotations,
    pub signature: Signature,
}

impl ProposedHeader {
    /// Canonical bytes signed by the proposer: `{header, round, annotations}`.
    pub fn sign_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&(&self.header, self.round, &self.proposal_annotations))
            .expect("proposed-header fields are always serializable")
    }

    pub fn verify_signature<S: ConsensusScheme>(&self, scheme: &S) -> bool {
        scheme.verify(&self.sign_bytes(), &self.signature, &self.proposer_pub_key)
    }
}
