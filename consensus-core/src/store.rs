//! Persistence ports (spec §6). Every store is interface-only in the
//! core; `testutil` ships an in-memory double for tests.
//!
//! Stores must be safe for concurrent reads; writes are serialized by
//! their owning component (spec §5 "Shared resources") — these traits
//! take `&self`, not `&mut self`, and implementations are expected to do
//! their own internal synchronization (e.g. a `RwLock` or a `DashMap`)
//! rather than relying on the caller to serialize writers for them.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::header::Header;
use crate::scheme::SparseSignatureProof;
use crate::validator::{Digest, PubKey, ValidatorSet};
use crate::vote::CommitProof;

/// Sparse votes and proposed headers persisted per (height, round), used
/// to reload round state on restart and to serve future-vote lookups.
#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn proposed_headers(
        &self,
        height: u64,
        round: u32,
    ) -> Result<Vec<crate::header::ProposedHeader>, StoreError>;

    async fn save_proposed_header(
        &self,
        header: crate::header::ProposedHeader,
    ) -> Result<(), StoreError>;

    async fn sparse_prevotes(
        &self,
        height: u64,
        round: u32,
    ) -> Result<Vec<SparseSignatureProof>, StoreError>;

    async fn sparse_precommits(
        &self,
        height: u64,
        round: u32,
    ) -> Result<Vec<SparseSignatureProof>, StoreError>;

    async fn save_sparse_prevotes(
        &self,
        height: u64,
        round: u32,
        proof: SparseSignatureProof,
    ) -> Result<(), StoreError>;

    async fn save_sparse_precommits(
        &self,
        height: u64,
        round: u32,
        proof: SparseSignatureProof,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CommittedHeaderStore: Send + Sync {
    async fn committed_header(&self, height: u64) -> Result<Option<Header>, StoreError>;
    async fn save_committed_header(&self, header: Header) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoredFinalization {
    pub height: u64,
    pub round: u32,
    pub block_hash: Digest,
    pub app_state_hash: Digest,
}

#[async_trait]
pub trait FinalizationStore: Send + Sync {
    async fn finalization(&self, height: u64) -> Result<Option<StoredFinalization>, StoreError>;
    async fn save_finalization(&self, finalization: StoredFinalization) -> Result<(), StoreError>;
}

/// Our own proposal/prevote/precommit per (height, round), so a restarted
/// validator never re-signs a conflicting vote.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn our_prevote(&self, height: u64, round: u32) -> Result<Option<Digest>, StoreError>;
    async fn our_precommit(&self, height: u64, round: u32) -> Result<Option<Digest>, StoreError>;
    async fn record_prevote(
        &self,
        height: u64,
        round: u32,
        block_hash: Option<Digest>,
    ) -> Result<(), StoreError>;
    async fn record_precommit(
        &self,
        height: u64,
        round: u32,
        block_hash: Option<Digest>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ValidatorStore: Send + Sync {
    async fn validator_set_by_hash(&self, hash: Digest) -> Result<Option<ValidatorSet>, StoreError>;
    async fn save_validator_set(&self, set: ValidatorSet) -> Result<(), StoreError>;
    async fn pub_keys_for_hash(&self, hash: Digest) -> Result<Vec<PubKey>, StoreError>;
}

/// The Mirror's own (height, round) pointer, persisted so a restart
/// resumes instead of replaying from genesis.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn mirror_round(&self) -> Result<Option<(u64, u32)>, StoreError>;
    async fn save_mirror_round(&self, height: u64, round: u32) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StateMachineStore: Send + Sync {
    async fn state_machine_round(&self) -> Result<Option<(u64, u32)>, StoreError>;
    async fn save_state_machine_round(&self, height: u64, round: u32) -> Result<(), StoreError>;
}
