//! `VoteTarget` and `CommitProof` (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::validator::Digest;
use crate::scheme::SparseSignatureProof;

/// What a prevote/precommit is actually about. An empty `block_hash`
/// denotes a nil vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteTarget {
    pub height: u64,
    pub round: u32,
    pub block_hash: Option<Digest>,
}

impl VoteTarget {
    pub fn is_nil(&self) -> bool {
        self.block_hash.is_none()
    }

    /// Canonical bytes signed for this vote target, over a fixed message
    /// kind discriminant so a prevote and a precommit for the same target
    /// never collide under the scheme's signature.
    pub fn sign_bytes(&self, kind: VoteKind) -> Vec<u8> {
        serde_json::to_vec(&(kind, self.height, self.round, &self.block_hash))
            .expect("vote targets are always serializable")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    Prevote,
    Precommit,
}

/// A previous height's commit proof as carried by a `Header`: one or more
/// sparse signature proofs, possibly spanning multiple candidate blocks
/// and nil, together totalling at least Byzantine-majority power on
/// exactly one of them (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitProof {
    pub round: u32,
    pub pub_key_hash: Digest,
    /// Keyed by block hash; a `None` key holds the nil-vote sparse proof.
    pub proofs: HashMap<Option<Digest>, SparseSignatureProof>,
}

impl CommitProof {
    pub fn block_proof(&self, block_hash: Digest) -> Option<&SparseSignatureProof> {
        self.proofs.get(&Some(block_hash))
    }
}
