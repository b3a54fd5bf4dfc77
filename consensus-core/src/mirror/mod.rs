//! The Mirror: the network-observed canonical view of consensus (spec
//! §4.1). `Mirror<S>` is a cheap, `Clone`-free handle around a channel to
//! the single [`kernel::MirrorKernel`] task that actually owns the three
//! canonical views; every public method here is a request/reply round
//! trip over that channel.

mod equivocation;
pub mod kernel;
mod request;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ProposedHeaderOutcome, VoteProofOutcome};
use crate::header::ProposedHeader;
use crate::messages::{Action, NetworkViewUpdate, RoundEntrance, RoundEntranceResponse};
use crate::scheme::{ConsensusScheme, FullProof, SparseSignatureProof};
use crate::store::{RoundStore, ValidatorStore};
use crate::validator::{Digest, ValidatorSet};
use crate::vote::VoteKind;

pub use equivocation::{EquivocationReport, EquivocationTracker};
pub use kernel::{MirrorKernel, MirrorStores};
pub use request::{HeaderCheck, MirrorRequest, VoteApplyOutcome, VoteSnapshot};

/// How many times to re-snapshot and retry a vote-proof merge after a CAS
/// conflict before giving up and logging (spec §4.1 "Conflict handling").
const MAX_CAS_RETRIES: u32 = 3;

/// Buffered(1) request channel between a `Mirror` handle and its kernel.
/// "Unbuffered" per spec §5 is modeled as capacity 1 with the convention
/// that every sender awaits the matching reply before sending again.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// The Mirror handle. Cloning requires no external synchronization: every
/// method is a message send to the kernel, which serializes all mutation.
#[derive(Clone)]
pub struct Mirror<S: ConsensusScheme> {
    scheme: Arc<S>,
    requests_tx: mpsc::Sender<MirrorRequest>,
    /// Used only for the AddFutureVotes path (spec §4.1): persisting sparse
    /// votes for a round the kernel doesn't have a view for yet happens
    /// directly against the stores, without a kernel round-trip.
    rounds: Arc<dyn RoundStore>,
    validators: Arc<dyn ValidatorStore>,
}

impl<S: ConsensusScheme> Mirror<S> {
    /// Spawn the kernel task and return a handle plus the outbound gossip
    /// update stream (spec §6 "Mirror -> gossip").
    pub fn spawn(
        scheme: Arc<S>,
        initial_voting_height: u64,
        genesis_validator_set: Arc<ValidatorSet>,
        stores: MirrorStores,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<NetworkViewUpdate>) {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (gossip_tx, gossip_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let rounds = stores.rounds.clone();
        let validators = stores.validators.clone();

        let kernel = MirrorKernel::new(
            scheme.clone(),
            initial_voting_height,
            genesis_validator_set,
            stores,
            gossip_tx,
            requests_rx,
            cancel,
        );
        tokio::spawn(kernel.run());

        (
            Self { scheme, requests_tx, rounds, validators },
            gossip_rx,
        )
    }

    /// spec §4.1 "Public contract: HandleProposedHeader", two-stage design:
    /// hash and signature verification run here, in the caller's own task,
    /// off the kernel's single-writer critical path; the kernel only ever
    /// applies an already-verified header. The lightweight in-kernel
    /// classification still runs first so a header targeting an orphaned or
    /// far-future round is rejected without doing that crypto work at all.
    pub async fn handle_proposed_header(&self, header: ProposedHeader) -> ProposedHeaderOutcome {
        if header.proposer_pub_key.0.is_empty() {
            return ProposedHeaderOutcome::MissingProposerPubKey;
        }
        if !header.header.verify_hash(&*self.scheme) {
            return ProposedHeaderOutcome::BadBlockHash;
        }
        if !header.verify_signature(&*self.scheme) {
            return ProposedHeaderOutcome::BadSignature;
        }

        let (reply, reply_rx) = oneshot::channel();
        if self
            .requests_tx
            .send(MirrorRequest::CheckHeader {
                height: header.header.height,
                round: header.round,
                reply,
            })
            .await
            .is_err()
        {
            return ProposedHeaderOutcome::RoundTooOld;
        }
        let check = match reply_rx.await {
            Ok(check) => check,
            Err(_) => return ProposedHeaderOutcome::RoundTooOld,
        };

        match check {
            HeaderCheck::Reject(outcome) => outcome,
            HeaderCheck::NeedsBackfill => {
                // The backfill path shifts the validator set as a side
                // effect, so the correct set to check membership against
                // doesn't exist until the kernel applies it; the kernel
                // re-checks membership itself once that shift has happened.
                let (reply, reply_rx) = oneshot::channel();
                if self
                    .requests_tx
                    .send(MirrorRequest::BackfillAndRecheck { header, reply })
                    .await
                    .is_err()
                {
                    return ProposedHeaderOutcome::RoundTooOld;
                }
                reply_rx.await.unwrap_or(ProposedHeaderOutcome::RoundTooOld)
            }
            HeaderCheck::Proceed { validator_set } => {
                if validator_set.index_of(&header.proposer_pub_key).is_none() {
                    return ProposedHeaderOutcome::SignerUnrecognized;
                }
                let (reply, reply_rx) = oneshot::channel();
                if self
                    .requests_tx
                    .send(MirrorRequest::ApplyHeader { header, reply })
                    .await
                    .is_err()
                {
                    return ProposedHeaderOutcome::RoundTooOld;
                }
                reply_rx.await.unwrap_or(ProposedHeaderOutcome::RoundTooOld)
            }
        }
    }

    /// `votes` pairs each sparse proof with the block hash it targets;
    /// nil votes use `Digest::ZERO` (spec §3 "nil" target, reserved per
    /// [`crate::validator::Digest`]'s doc comment).
    pub async fn handle_prevote_proofs(
        &self,
        height: u64,
        round: u32,
        votes: Vec<(Digest, SparseSignatureProof)>,
    ) -> VoteProofOutcome {
        self.handle_vote_proofs(height, round, VoteKind::Prevote, votes).await
    }

    pub async fn handle_precommit_proofs(
        &self,
        height: u64,
        round: u32,
        votes: Vec<(Digest, SparseSignatureProof)>,
    ) -> VoteProofOutcome {
        self.handle_vote_proofs(height, round, VoteKind::Precommit, votes).await
    }

    /// spec §4.1 "Public contract: HandlePrevoteProofs / HandlePrecommitProofs".
    /// Snapshot, merge in this caller's own task (the CPU-heavy signature
    /// verification happens here, not on the kernel), then apply with a
    /// version CAS. A conflicting concurrent writer means re-snapshot and
    /// retry, up to [`MAX_CAS_RETRIES`] times before logging and giving up.
    async fn handle_vote_proofs(
        &self,
        height: u64,
        round: u32,
        kind: VoteKind,
        votes: Vec<(Digest, SparseSignatureProof)>,
    ) -> VoteProofOutcome {
        if votes.is_empty() {
            return VoteProofOutcome::Empty;
        }

        for attempt in 0..=MAX_CAS_RETRIES {
            let (reply, reply_rx) = oneshot::channel();
            if self
                .requests_tx
                .send(MirrorRequest::SnapshotVotes { height, round, kind, reply })
                .await
                .is_err()
            {
                return VoteProofOutcome::RoundTooOld;
            }
            let snapshot = match reply_rx.await {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(VoteProofOutcome::FutureUnverified)) => {
                    return self.handle_future_votes(height, round, kind, votes).await;
                }
                Ok(Err(outcome)) => return outcome,
                Err(_) => return VoteProofOutcome::RoundTooOld,
            };

            let VoteSnapshot { mut proofs, prev_versions, candidates, pub_key_hash } = snapshot;

            for (_, sp) in &votes {
                if sp.pub_key_hash != pub_key_hash {
                    return VoteProofOutcome::BadPubKeyHash;
                }
            }

            let mut merged: HashMap<Digest, FullProof> = HashMap::new();
            for (block_hash, sp) in &votes {
                let block_hash = *block_hash;
                let target = if block_hash.is_zero() { None } else { Some(block_hash) };
                let message = crate::vote::VoteTarget { height, round, block_hash: target }.sign_bytes(kind);
                let entry = proofs.entry(block_hash).or_insert_with(|| {
                    self.scheme.new_proof(message, candidates.clone(), pub_key_hash)
                });
                match entry.merge_sparse(&*self.scheme, sp) {
                    Ok(_) => {}
                    Err(_) => return VoteProofOutcome::BadSignature,
                }
                merged.insert(block_hash, entry.clone());
            }

            if merged.is_empty() {
                return VoteProofOutcome::NoNewSignatures;
            }

            let (reply, reply_rx) = oneshot::channel();
            if self
                .requests_tx
                .send(MirrorRequest::ApplyVotes {
                    height,
                    round,
                    kind,
                    merged,
                    prev_versions,
                    reply,
                })
                .await
                .is_err()
            {
                return VoteProofOutcome::RoundTooOld;
            }
            match reply_rx.await {
                Ok(VoteApplyOutcome::Applied(outcome)) => return outcome,
                Ok(VoteApplyOutcome::Conflict) => {
                    if attempt == MAX_CAS_RETRIES {
                        warn!(height, round, attempt, "giving up on vote-proof apply after repeated CAS conflicts");
                        return VoteProofOutcome::Conflict;
                    }
                    continue;
                }
                Err(_) => return VoteProofOutcome::RoundTooOld,
            }
        }
        VoteProofOutcome::Conflict
    }

    /// spec §4.1 "AddFutureVotes": a vote for a round the kernel has no
    /// view for yet (too far ahead to have a Voting/NextRound slot) can
    /// still be signature-checked against the validator set on record for
    /// its claimed pub-key hash, and persisted directly so it's available
    /// once that round actually arrives. Distinct from the normal CAS path:
    /// there's no in-memory proof to merge against, only what's already on
    /// the round store.
    async fn handle_future_votes(
        &self,
        height: u64,
        round: u32,
        kind: VoteKind,
        votes: Vec<(Digest, SparseSignatureProof)>,
    ) -> VoteProofOutcome {
        let mut any_increased = false;
        let mut any_verified = false;

        for (block_hash, sp) in votes {
            let candidates = match self.validators.pub_keys_for_hash(sp.pub_key_hash).await {
                Ok(keys) => keys,
                Err(_) => return VoteProofOutcome::InternalError,
            };
            if candidates.is_empty() {
                continue;
            }
            any_verified = true;

            let persisted = match kind {
                VoteKind::Prevote => self.rounds.sparse_prevotes(height, round).await,
                VoteKind::Precommit => self.rounds.sparse_precommits(height, round).await,
            };
            let persisted = match persisted {
                Ok(p) => p,
                Err(_) => return VoteProofOutcome::InternalError,
            };

            let target = if block_hash.is_zero() { None } else { Some(block_hash) };
            let message = crate::vote::VoteTarget { height, round, block_hash: target }.sign_bytes(kind);
            let mut existing = self.scheme.new_proof(message, candidates, sp.pub_key_hash);
            for prior in persisted.iter().filter(|p| p.pub_key_hash == sp.pub_key_hash) {
                let _ = existing.merge_sparse(&*self.scheme, prior);
            }

            let result = match existing.merge_sparse(&*self.scheme, &sp) {
                Ok(result) => result,
                Err(_) => return VoteProofOutcome::BadSignature,
            };
            if !result.increased_signatures {
                continue;
            }
            any_increased = true;
            let save = match kind {
                VoteKind::Prevote => self.rounds.save_sparse_prevotes(height, round, sp).await,
                VoteKind::Precommit => self.rounds.save_sparse_precommits(height, round, sp).await,
            };
            if save.is_err() {
                return VoteProofOutcome::InternalError;
            }
        }

        if any_increased {
            VoteProofOutcome::FutureVerified
        } else if any_verified {
            VoteProofOutcome::NoNewSignatures
        } else {
            VoteProofOutcome::FutureUnverified
        }
    }

    /// Every double-sign observed so far (spec §1: "detected but not
    /// punished"). Intended for a driver's own slashing/alerting layer,
    /// which this crate deliberately does not implement.
    pub async fn equivocation_reports(&self) -> Vec<EquivocationReport> {
        let (reply, reply_rx) = oneshot::channel();
        if self
            .requests_tx
            .send(MirrorRequest::EquivocationReports { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// spec §4.2 "Round entrance": the State Machine asks to join (height,
    /// round), keeping the `Sender<Action>` half of the actions channel for
    /// itself and handing the kernel the `Receiver` half embedded in the
    /// request.
    /// Returns the `Action` sender the caller keeps for this round, the
    /// `height_committed` receiver, the initial join/replay response, and
    /// the receiver side of the live view-update channel (spec §6
    /// "State-machine round-view channel").
    pub async fn enter_round(
        &self,
        height: u64,
        round: u32,
        pub_key: Option<crate::validator::PubKey>,
    ) -> (
        mpsc::Sender<Action>,
        oneshot::Receiver<()>,
        RoundEntranceResponse,
        mpsc::Receiver<crate::messages::StateMachineRoundView>,
    ) {
        let (actions_tx, actions_rx) = mpsc::channel(3);
        let (height_committed_tx, height_committed_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        let (update_tx, update_rx) = mpsc::channel(1);

        let entrance = RoundEntrance {
            height,
            round,
            pub_key,
            actions_rx: Some(actions_rx),
            height_committed_tx: Some(height_committed_tx),
            response_tx,
            update_tx,
        };
        let _ = self.requests_tx.send(MirrorRequest::RoundEntrance(entrance)).await;
        let response = response_rx
            .await
            .unwrap_or_else(|_| panic!("mirror kernel dropped a round-entrance response"));
        (actions_tx, height_committed_rx, response, update_rx)
    }
}

