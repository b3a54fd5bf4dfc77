//! In-memory store doubles for tests (spec §7 "Store contracts"). Every
//! store here is backed by a `tokio::sync::RwLock` over a plain map: the
//! traits only require `Send + Sync`, not single-writer discipline on
//! their own, so these doubles do their own locking rather than leaning on
//! a caller that already serializes writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::header::{Header, ProposedHeader};
use crate::scheme::SparseSignatureProof;
use crate::store::{
    ActionStore, CommittedHeaderStore, FinalizationStore, MirrorStore, RoundStore,
    StateMachineStore, StoredFinalization, ValidatorStore,
};
use crate::validator::{Digest, PubKey, ValidatorSet};

type RoundKey = (u64, u32);

#[derive(Default)]
struct RoundEntry {
    headers: Vec<ProposedHeader>,
    prevotes: Vec<SparseSignatureProof>,
    precommits: Vec<SparseSignatureProof>,
}

/// An in-memory [`RoundStore`].
#[derive(Default)]
pub struct InMemoryRoundStore {
    rounds: RwLock<HashMap<RoundKey, RoundEntry>>,
}

impl InMemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundStore for InMemoryRoundStore {
    async fn proposed_headers(&self, height: u64, round: u32) -> Result<Vec<ProposedHeader>, StoreError> {
        Ok(self
            .rounds
            .read()
            .await
            .get(&(height, round))
            .map(|e| e.headers.clone())
            .unwrap_or_default())
    }

    async fn save_proposed_header(&self, header: ProposedHeader) -> Result<(), StoreError> {
        let key = (header.header.height, header.round);
        self.rounds.write().await.entry(key).or_default().headers.push(header);
        Ok(())
    }

    async fn sparse_prevotes(&self, height: u64, round: u32) -> Result<Vec<SparseSignatureProof>, StoreError> {
        Ok(self
            .rounds
            .read()
            .await
            .get(&(height, round))
            .map(|e| e.prevotes.clone())
            .unwrap_or_default())
    }

    async fn sparse_precommits(&self, height: u64, round: u32) -> Result<Vec<SparseSignatureProof>, StoreError> {
        Ok(self
            .rounds
            .read()
            .await
            .get(&(height, round))
            .map(|e| e.precommits.clone())
            .unwrap_or_default())
    }

    async fn save_sparse_prevotes(
        &self,
        height: u64,
        round: u32,
        proof: SparseSignatureProof,
    ) -> Result<(), StoreError> {
        self.rounds
            .write()
            .await
            .entry((height, round))
            .or_default()
            .prevotes
            .push(proof);
        Ok(())
    }

    async fn save_sparse_precommits(
        &self,
        height: u64,
        round: u32,
        proof: SparseSignatureProof,
    ) -> Result<(), StoreError> {
        self.rounds
            .write()
            .await
            .entry((height, round))
            .or_default()
            .precommits
            .push(proof);
        Ok(())
    }
}

/// An in-memory [`CommittedHeaderStore`].
#[derive(Default)]
pub struct InMemoryCommittedHeaderStore {
    headers: RwLock<HashMap<u64, Header>>,
}

impl InMemoryCommittedHeaderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommittedHeaderStore for InMemoryCommittedHeaderStore {
    async fn committed_header(&self, height: u64) -> Result<Option<Header>, StoreError> {
        Ok(self.headers.read().await.get(&height).cloned())
    }

    async fn save_committed_header(&self, header: Header) -> Result<(), StoreError> {
        self.headers.write().await.insert(header.height, header);
        Ok(())
    }
}

/// An in-memory [`FinalizationStore`].
#[derive(Default)]
pub struct InMemoryFinalizationStore {
    finalizations: RwLock<HashMap<u64, StoredFinalization>>,
}

impl InMemoryFinalizationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FinalizationStore for InMemoryFinalizationStore {
    async fn finalization(&self, height: u64) -> Result<Option<StoredFinalization>, StoreError> {
        Ok(self.finalizations.read().await.get(&height).cloned())
    }

    async fn save_finalization(&self, finalization: StoredFinalization) -> Result<(), StoreError> {
        self.finalizations.write().await.insert(finalization.height, finalization);
        Ok(())
    }
}

/// An in-memory [`ActionStore`]. Per [`ActionStore`]'s documented
/// limitation, a recorded nil vote (`None`) and "never voted" are both
/// represented by the key's absence — this double doesn't try to improve
/// on that, since tests exercise the same ambiguity the real stores have.
#[derive(Default)]
pub struct InMemoryActionStore {
    prevotes: RwLock<HashMap<RoundKey, Digest>>,
    precommits: RwLock<HashMap<RoundKey, Digest>>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn our_prevote(&self, height: u64, round: u32) -> Result<Option<Digest>, StoreError> {
        Ok(self.prevotes.read().await.get(&(height, round)).copied())
    }

    async fn our_precommit(&self, height: u64, round: u32) -> Result<Option<Digest>, StoreError> {
        Ok(self.precommits.read().await.get(&(height, round)).copied())
    }

    async fn record_prevote(&self, height: u64, round: u32, block_hash: Option<Digest>) -> Result<(), StoreError> {
        if let Some(hash) = block_hash {
            self.prevotes.write().await.insert((height, round), hash);
        }
        Ok(())
    }

    async fn record_precommit(&self, height: u64, round: u32, block_hash: Option<Digest>) -> Result<(), StoreError> {
        if let Some(hash) = block_hash {
            self.precommits.write().await.insert((height, round), hash);
        }
        Ok(())
    }
}

/// An in-memory [`ValidatorStore`].
#[derive(Default)]
pub struct InMemoryValidatorStore {
    sets: RwLock<HashMap<Digest, ValidatorSet>>,
}

impl InMemoryValidatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidatorStore for InMemoryValidatorStore {
    async fn validator_set_by_hash(&self, hash: Digest) -> Result<Option<ValidatorSet>, StoreError> {
        Ok(self.sets.read().await.get(&hash).cloned())
    }

    async fn save_validator_set(&self, set: ValidatorSet) -> Result<(), StoreError> {
        self.sets.write().await.insert(set.pub_key_hash(), set);
        Ok(())
    }

    async fn pub_keys_for_hash(&self, hash: Digest) -> Result<Vec<PubKey>, StoreError> {
        Ok(self
            .sets
            .read()
            .await
            .get(&hash)
            .map(|s| s.validators().iter().map(|v| v.pub_key.clone()).collect())
            .unwrap_or_default())
    }
}

/// An in-memory [`MirrorStore`].
#[derive(Default)]
pub struct InMemoryMirrorStore {
    round: RwLock<Option<(u64, u32)>>,
}

impl InMemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirrorStore {
    async fn mirror_round(&self) -> Result<Option<(u64, u32)>, StoreError> {
        Ok(*self.round.read().await)
    }

    async fn save_mirror_round(&self, height: u64, round: u32) -> Result<(), StoreError> {
        *self.round.write().await = Some((height, round));
        Ok(())
    }
}

/// An in-memory [`StateMachineStore`].
#[derive(Default)]
pub struct InMemoryStateMachineStore {
    round: RwLock<Option<(u64, u32)>>,
}

impl InMemoryStateMachineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateMachineStore for InMemoryStateMachineStore {
    async fn state_machine_round(&self) -> Result<Option<(u64, u32)>, StoreError> {
        Ok(*self.round.read().await)
    }

    async fn save_state_machine_round(&self, height: u64, round: u32) -> Result<(), StoreError> {
        *self.round.write().await = Some((height, round));
        Ok(())
    }
}

/// Every store double bundled together, so a test can build a `Mirror` and
/// a `StateMachine` with one call.
pub struct InMemoryStores {
    pub rounds: Arc<InMemoryRoundStore>,
    pub committed_headers: Arc<InMemoryCommittedHeaderStore>,
    pub finalizations: Arc<InMemoryFinalizationStore>,
    pub actions: Arc<InMemoryActionStore>,
    pub validators: Arc<InMemoryValidatorStore>,
    pub mirror: Arc<InMemoryMirrorStore>,
    pub state_machine: Arc<InMemoryStateMachineStore>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self {
            rounds: Arc::new(InMemoryRoundStore::new()),
            committed_headers: Arc::new(InMemoryCommittedHeaderStore::new()),
            finalizations: Arc::new(InMemoryFinalizationStore::new()),
            actions: Arc::new(InMemoryActionStore::new()),
            validators: Arc::new(InMemoryValidatorStore::new()),
            mirror: Arc::new(InMemoryMirrorStore::new()),
            state_machine: Arc::new(InMemoryStateMachineStore::new()),
        }
    }

    pub fn mirror_stores(&self) -> crate::mirror::MirrorStores {
        crate::mirror::MirrorStores::new(
            self.rounds.clone(),
            self.committed_headers.clone(),
            self.validators.clone(),
            self.mirror.clone(),
        )
    }

    pub fn state_machine_stores(&self) -> crate::state_machine::StateMachineStores {
        crate::state_machine::StateMachineStores {
            actions: self.actions.clone(),
            finalizations: self.finalizations.clone(),
            validators: self.validators.clone(),
            state_machine: self.state_machine.clone(),
        }
    }
}

impl Default for InMemoryStores {
    fn default() -> Self {
        Self::new()
    }
}
