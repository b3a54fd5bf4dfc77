//! The `ConsensusScheme` capability set (spec §4.3, §9 design note):
//! hashing, signing, and signature-proof aggregation, kept as one
//! polymorphic collaborator so every component takes a single type
//! parameter instead of threading three.
//!
//! `consensus-core` only depends on the trait; `consensus-schemes`
//! supplies the default, non-aggregating implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ProofError;
use crate::validator::{Digest, PubKey};

/// An opaque signature. The core never interprets these bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// Per-validator positional index encoded as the wire `key_id`. The
/// default scheme uses a big-endian 16-bit index (spec §3, §4.3); an
/// aggregating scheme may reinterpret this type without changing anything
/// in `consensus-core`.
pub type KeyId = u16;

/// Result of merging signatures into a [`FullProof`] (spec §4.1, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeResult {
    /// Every signature in the merged proof verifies.
    pub all_valid_signatures: bool,
    /// The merge added at least one signature that was not already present.
    pub increased_signatures: bool,
    /// Every signature from the incoming side was already present on this
    /// side before the merge (i.e. the merge was a no-op in the other
    /// direction).
    pub was_strict_superset: bool,
}

/// Wire-compact form of a signature proof: just the signatures that were
/// actually collected, addressed by validator index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseSignatureProof {
    pub pub_key_hash: Digest,
    pub signatures: Vec<(KeyId, Signature)>,
}

impl SparseSignatureProof {
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn has_key_id(&self, id: KeyId) -> bool {
        self.signatures.iter().any(|(k, _)| *k == id)
    }
}

/// In-memory, bitset-plus-map form of a signature proof over a fixed
/// message and candidate key set (spec §3).
///
/// Invariants upheld by every mutating method: (a) every signature
/// verifies against its declared key and `message`; (b) every declared key
/// is a member of `candidates`; (c) `bitset[i]` is set iff
/// `candidates[i]` contributed a signature.
#[derive(Debug, Clone)]
pub struct FullProof {
    message: Vec<u8>,
    candidates: Vec<PubKey>,
    pub_key_hash: Digest,
    signatures: HashMap<KeyId, Signature>,
    bitset: Vec<bool>,
}

impl FullProof {
    pub fn new(message: Vec<u8>, candidates: Vec<PubKey>, pub_key_hash: Digest) -> Self {
        let bitset = vec![false; candidates.len()];
        Self {
            message,
            candidates,
            pub_key_hash,
            signatures: HashMap::new(),
            bitset,
        }
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn pub_key_hash(&self) -> Digest {
        self.pub_key_hash
    }

    pub fn candidates(&self) -> &[PubKey] {
        &self.candidates
    }

    pub fn popcount(&self) -> usize {
        self.bitset.iter().filter(|b| **b).count()
    }

    pub fn is_empty(&self) -> bool {
        self.popcount() == 0
    }

    /// Total vote power contributed so far, given the powers line up
    /// positionally with `candidates`.
    pub fn power(&self, powers: &[u64]) -> u64 {
        self.bitset
            .iter()
            .zip(powers.iter())
            .filter(|(set, _)| **set)
            .map(|(_, p)| *p)
            .sum()
    }

    fn key_id_of(&self, key: &PubKey) -> Option<KeyId> {
        self.candidates
            .iter()
            .position(|c| c == key)
            .map(|i| i as KeyId)
    }

    /// Add one signature. Returns `Ok(true)` if it was new, `Ok(false)` if
    /// it was already present (idempotent), or an error if the key isn't a
    /// candidate or the signature doesn't verify.
    pub fn add_signature<S: ConsensusScheme>(
        &mut self,
        scheme: &S,
        signature: Signature,
        key: &PubKey,
    ) -> Result<bool, ProofError> {
        let id = self.key_id_of(key).ok_or(ProofError::UnknownSigner)?;
        if self.signatures.contains_key(&id) {
            return Ok(false);
        }
        if !scheme.verify(&self.message, &signature, key) {
            return Err(ProofError::BadSignature);
        }
        self.signatures.insert(id, signature);
        self.bitset[id as usize] = true;
        Ok(true)
    }

    /// Merge another full proof over the same message/candidate set.
    pub fn merge(&mut self, other: &FullProof) -> MergeResult {
        let before = self.popcount();
        let mut was_strict_superset = true;
        for (id, sig) in &other.signatures {
            if !self.signatures.contains_key(id) {
                was_strict_superset = false;
                self.signatures.insert(*id, sig.clone());
                self.bitset[*id as usize] = true;
            }
        }
        let increased_signatures = self.popcount() > before;
        MergeResult {
            all_valid_signatures: true,
            increased_signatures,
            was_strict_superset,
        }
    }

    /// Merge a sparse proof, verifying every signature that isn't already
    /// present. `BadSignature`/`UnknownKeyId` short-circuit the merge —
    /// the caller (Mirror) rejects the whole message rather than applying
    /// a partially-verified proof.
    pub fn merge_sparse<S: ConsensusScheme>(
        &mut self,
        scheme: &S,
        sparse: &SparseSignatureProof,
    ) -> Result<MergeResult, ProofError> {
        if sparse.pub_key_hash != self.pub_key_hash {
            return Err(ProofError::PubKeyHashMismatch {
                expected: self.pub_key_hash.to_string(),
                got: sparse.pub_key_hash.to_string(),
            });
        }
        let before = self.popcount();
        let mut was_strict_superset = true;
        for (id, sig) in &sparse.signatures {
            if self.signatures.contains_key(id) {
                continue;
            }
            was_strict_superset = false;
            let idx = *id as usize;
            let key = self
                .candidates
                .get(idx)
                .ok_or(ProofError::UnknownKeyId(*id as u32))?
                .clone();
            if !scheme.verify(&self.message, sig, &key) {
                return Err(ProofError::BadSignature);
            }
            self.signatures.insert(*id, sig.clone());
            self.bitset[idx] = true;
        }
        let increased_signatures = self.popcount() > before;
        Ok(MergeResult {
            all_valid_signatures: true,
            increased_signatures,
            was_strict_superset,
        })
    }

    pub fn as_sparse(&self) -> SparseSignatureProof {
        let mut signatures: Vec<(KeyId, Signature)> = self
            .signatures
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        signatures.sort_by_key(|(k, _)| *k);
        SparseSignatureProof {
            pub_key_hash: self.pub_key_hash,
            signatures,
        }
    }

    /// `(has, valid)`: whether this proof already carries a signature for
    /// `id`, and whether `id` is a valid candidate index at all.
    pub fn has_sparse_key_id(&self, id: KeyId) -> (bool, bool) {
        let valid = (id as usize) < self.candidates.len();
        (self.signatures.contains_key(&id), valid)
    }

    /// Candidate indices that have signed so far, resolved to pub keys.
    /// Used to cross-reference the same signer across two different
    /// blocks' proofs (double-sign detection).
    pub fn signers(&self) -> impl Iterator<Item = &PubKey> + '_ {
        self.signatures
            .keys()
            .filter_map(move |id| self.candidates.get(*id as usize))
    }
}

/// Validates candidacy of a `key_id` against a fixed validator ordering
/// without re-deriving the index every call.
pub struct KeyIdChecker {
    len: usize,
    index_by_key: HashMap<PubKey, KeyId>,
}

impl KeyIdChecker {
    pub fn is_valid(&self, id: KeyId) -> bool {
        (id as usize) < self.len
    }

    pub fn key_id_for(&self, key: &PubKey) -> Option<KeyId> {
        self.index_by_key.get(key).copied()
    }
}

/// Hashing, signing, and signature-proof-aggregation capability set.
/// Implementers keep these as explicit collaborators passed to component
/// constructors (spec §9 design note); nothing in `consensus-core` hashes
/// or verifies without going through this trait.
pub trait ConsensusScheme: Send + Sync + 'static {
    fn verify(&self, message: &[u8], signature: &Signature, key: &PubKey) -> bool;
    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Signature;
    fn derive_pub_key(&self, secret_key: &[u8]) -> PubKey;

    fn hash_block(&self, canonical_bytes: &[u8]) -> Digest;
    fn hash_pubkeys<'a, I: IntoIterator<Item = &'a PubKey>>(&self, keys: I) -> Digest;
    fn hash_vote_powers<I: IntoIterator<Item = u64>>(&self, powers: I) -> Digest;

    fn new_proof(&self, message: Vec<u8>, candidates: Vec<PubKey>, pub_key_hash: Digest) -> FullProof {
        FullProof::new(message, candidates, pub_key_hash)
    }

    fn key_id_checker(&self, keys: &[PubKey]) -> KeyIdChecker {
        KeyIdChecker {
            len: keys.len(),
            index_by_key: keys
                .iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), i as KeyId))
                .collect(),
        }
    }

    /// Merge a `main` proof with zero or more `rest` proofs covering the
    /// same message/candidate set into one finalized proof (used when the
    /// Mirror assembles a block's outbound commit proof from several
    /// partially-overlapping views).
    fn finalize(&self, main: &FullProof, rest: &[&FullProof]) -> FullProof {
        let mut merged = main.clone();
        for proof in rest {
            merged.merge(proof);
        }
        merged
    }

    /// Re-verify a finalized, possibly multi-block proof set and report,
    /// per block hash, which candidate indices signed and whether every
    /// validator signed at most one block (no double-vote across blocks).
    fn validate_finalized(
        &self,
        by_block: &HashMap<Digest, FullProof>,
    ) -> (HashMap<Digest, Vec<bool>>, bool) {
        let mut seen = std::collections::HashSet::new();
        let mut all_unique = true;
        let mut bits_by_hash = HashMap::new();
        for (hash, proof) in by_block {
            for (id, _) in proof.signatures.iter() {
                if !seen.insert((proof.pub_key_hash, *id)) {
                    all_unique = false;
                }
            }
            bits_by_hash.insert(*hash, proof.bitset.clone());
        }
        (bits_by_hash, all_unique)
    }
}
