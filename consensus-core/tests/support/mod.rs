//! Shared fixtures for the integration tests: a small validator set, a
//! genesis-rooted header builder, and vote-proof assembly helpers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use consensus_core::header::{Header, ProposedHeader};
use consensus_core::messages::NetworkViewUpdate;
use consensus_core::mirror::Mirror;
use consensus_core::scheme::{ConsensusScheme, SparseSignatureProof};
use consensus_core::testutil::InMemoryStores;
use consensus_core::validator::{Digest, PubKey, Validator, ValidatorSet};
use consensus_core::vote::{VoteKind, VoteTarget};
use consensus_schemes::Ed25519Blake3Scheme;

pub struct Fixture {
    pub scheme: Arc<Ed25519Blake3Scheme>,
    pub validator_set: Arc<ValidatorSet>,
    pub keys: Vec<(PubKey, Vec<u8>)>,
}

/// `n` validators of equal power 1, ordered the way they're generated —
/// that order is also each validator's `KeyId` in a sparse proof.
pub fn fixture(n: usize) -> Fixture {
    let scheme = Arc::new(Ed25519Blake3Scheme::new());
    let keys: Vec<(PubKey, Vec<u8>)> = (0..n).map(|_| Ed25519Blake3Scheme::generate_keypair()).collect();
    let validators: Vec<Validator> = keys
        .iter()
        .map(|(pub_key, _)| Validator { pub_key: pub_key.clone(), power: 1 })
        .collect();
    let validator_set = Arc::new(ValidatorSet::new(validators, &*scheme));
    Fixture { scheme, validator_set, keys }
}

impl Fixture {
    /// A header at `height` proposed by validator `proposer_idx` for
    /// `round`, with the given ancestry, signed with that validator's key.
    #[allow(clippy::too_many_arguments)]
    pub fn proposed_header(
        &self,
        height: u64,
        round: u32,
        prev_block_hash: Digest,
        prev_commit_proof: Option<consensus_core::vote::CommitProof>,
        data_id: &str,
        proposer_idx: usize,
    ) -> ProposedHeader {
        let header = Header::new(
            &*self.scheme,
            height,
            prev_block_hash,
            prev_commit_proof,
            &self.validator_set,
            &self.validator_set,
            data_id.to_string(),
            Digest::ZERO,
            Vec::new(),
        );
        self.sign_proposal(header, round, proposer_idx)
    }

    fn sign_proposal(&self, header: Header, round: u32, proposer_idx: usize) -> ProposedHeader {
        let (proposer_pub_key, proposer_secret) = self.keys[proposer_idx].clone();
        let unsigned = ProposedHeader {
            header: Arc::new(header),
            round,
            proposer_pub_key,
            proposal_annotations: Vec::new(),
            signature: consensus_core::scheme::Signature(Vec::new()),
        };
        let signature = self.scheme.sign(&unsigned.sign_bytes(), &proposer_secret);
        ProposedHeader { signature, ..unsigned }
    }

    /// A sparse vote proof over `target`/`kind`, signed by each validator
    /// index in `signer_idxs`.
    pub fn sparse_vote(&self, target: VoteTarget, kind: VoteKind, signer_idxs: &[usize]) -> SparseSignatureProof {
        let message = target.sign_bytes(kind);
        let signatures = signer_idxs
            .iter()
            .map(|&idx| {
                let (_, secret) = &self.keys[idx];
                let signature = self.scheme.sign(&message, secret);
                (idx as u16, signature)
            })
            .collect();
        SparseSignatureProof { pub_key_hash: self.validator_set.pub_key_hash(), signatures }
    }

    /// Spawn a `Mirror` over fresh in-memory stores, starting voting at
    /// `initial_height`.
    pub fn spawn_mirror(
        &self,
        initial_height: u64,
        stores: &InMemoryStores,
    ) -> (Mirror<Ed25519Blake3Scheme>, mpsc::Receiver<NetworkViewUpdate>, CancellationToken) {
        let cancel = CancellationToken::new();
        let (mirror, gossip_rx) = Mirror::spawn(
            self.scheme.clone(),
            initial_height,
            self.validator_set.clone(),
            stores.mirror_stores(),
            cancel.clone(),
        );
        (mirror, gossip_rx, cancel)
    }
}
