//! The Mirror Kernel: the single task that owns Committing/Voting/NextRound
//! (spec §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MirrorError, ProposedHeaderOutcome, VoteProofOutcome};
use crate::header::ProposedHeader;
use crate::messages::{
    Action, JumpAheadRoundView, NetworkViewUpdate, RoundEntrance, RoundEntranceResponse,
    RoundSessionChange, RoundSessionState, StateMachineRoundView,
};
use crate::scheme::ConsensusScheme;
use crate::store::{CommittedHeaderStore, MirrorStore, RoundStore, ValidatorStore};
use crate::validator::{byzantine_majority, Digest, ValidatorSet};
use crate::view::{RoundView, VersionedRoundView, ViewLookupError};
use crate::vote::{CommitProof, VoteKind, VoteTarget};

use super::equivocation::EquivocationTracker;
use super::request::{HeaderCheck, MirrorRequest, VoteApplyOutcome, VoteSnapshot};

/// Which canonical slot a (height, round) falls into, returned by the
/// kernel's view-lookup (spec §4.1 "View lookup").
enum Slot {
    Committing,
    Voting,
    NextRound,
}

/// The state machine currently occupying a round, as tracked by the kernel
/// for the purpose of collapsing its commit-wait timer and folding in its
/// own actions (spec §4.2 "Round entrance").
struct SmEntrance {
    height: u64,
    round: u32,
    pub_key: Option<crate::validator::PubKey>,
    actions_rx: Option<mpsc::Receiver<Action>>,
    height_committed_tx: Option<oneshot::Sender<()>>,
    update_tx: mpsc::Sender<StateMachineRoundView>,
}

pub struct MirrorStores {
    pub rounds: Arc<dyn RoundStore>,
    pub committed_headers: Arc<dyn CommittedHeaderStore>,
    pub validators: Arc<dyn ValidatorStore>,
    pub mirror: Arc<dyn MirrorStore>,
}

impl MirrorStores {
    pub fn new(
        rounds: Arc<dyn RoundStore>,
        committed_headers: Arc<dyn CommittedHeaderStore>,
        validators: Arc<dyn ValidatorStore>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Self {
        Self {
            rounds,
            committed_headers,
            validators,
            mirror,
        }
    }
}

pub struct MirrorKernel<S: ConsensusScheme> {
    scheme: Arc<S>,
    committing: Option<VersionedRoundView>,
    voting: VersionedRoundView,
    next_round: VersionedRoundView,
    nil_voted_round: Option<VersionedRoundView>,
    pending_session_changes: Vec<RoundSessionChange>,
    sm: Option<SmEntrance>,
    equivocation: EquivocationTracker,
    /// Commit proof for every height this kernel has personally shifted
    /// into Committing, keyed by height. Unbounded for the kernel's
    /// lifetime — a long-running driver that needs to replay far-past
    /// heights should serve those from its own durable history instead of
    /// this in-memory cache.
    committed_proofs: HashMap<u64, CommitProof>,
    stores: MirrorStores,
    gossip_tx: mpsc::Sender<NetworkViewUpdate>,
    requests_rx: mpsc::Receiver<MirrorRequest>,
    cancel: CancellationToken,
}

impl<S: ConsensusScheme> MirrorKernel<S> {
    pub fn new(
        scheme: Arc<S>,
        initial_voting_height: u64,
        genesis_validator_set: Arc<ValidatorSet>,
        stores: MirrorStores,
        gossip_tx: mpsc::Sender<NetworkViewUpdate>,
        requests_rx: mpsc::Receiver<MirrorRequest>,
        cancel: CancellationToken,
    ) -> Self {
        let voting = VersionedRoundView::new(RoundView::new(
            initial_voting_height,
            0,
            genesis_validator_set.clone(),
            None,
        ));
        let next_round = VersionedRoundView::new(RoundView::new(
            initial_voting_height,
            1,
            genesis_validator_set,
            None,
        ));
        Self {
            scheme,
            committing: None,
            voting,
            next_round,
            nil_voted_round: None,
            pending_session_changes: Vec::new(),
            sm: None,
            equivocation: EquivocationTracker::default(),
            committed_proofs: HashMap::new(),
            stores,
            gossip_tx,
            requests_rx,
            cancel,
        }
    }

    /// The kernel's event loop. Every branch also watches `cancel` so
    /// teardown is a cancel + await, never a forced abort (spec §5).
    pub async fn run(mut self) {
        // Make sure the genesis set resolves by hash even if it never gets
        // re-saved by a rotation (spec §4.1(c)'s validator-set lookup).
        if let Err(err) = self
            .stores
            .validators
            .save_validator_set((*self.voting.view.validator_set).clone())
            .await
        {
            warn!(%err, "failed to persist genesis validator set");
        }
        loop {
            let has_actions = self
                .sm
                .as_ref()
                .map(|e| e.actions_rx.is_some())
                .unwrap_or(false);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("mirror kernel shutting down");
                    return;
                }
                request = self.requests_rx.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => return,
                    }
                }
                Some(action) = async {
                    match self.sm.as_mut().and_then(|e| e.actions_rx.as_mut()) {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                }, if has_actions => {
                    self.apply_local_action(action).await;
                }
            }
        }
    }

    async fn handle_request(&mut self, request: MirrorRequest) {
        match request {
            MirrorRequest::CheckHeader { height, round, reply } => {
                let _ = reply.send(self.check_header(height, round));
            }
            MirrorRequest::ApplyHeader { header, reply } => {
                let outcome = self.apply_header(header).await;
                let _ = reply.send(outcome);
            }
            MirrorRequest::BackfillAndRecheck { header, reply } => {
                let outcome = self.backfill_and_recheck(header).await;
                let _ = reply.send(outcome);
            }
            MirrorRequest::SnapshotVotes { height, round, kind, reply } => {
                let _ = reply.send(self.snapshot_votes(height, round, kind));
            }
            MirrorRequest::ApplyVotes { height, round, kind, merged, prev_versions, reply } => {
                let outcome = self.apply_votes(height, round, kind, merged, prev_versions).await;
                let _ = reply.send(outcome);
            }
            MirrorRequest::RoundEntrance(entrance) => {
                self.handle_round_entrance(entrance).await;
            }
            MirrorRequest::EquivocationReports { reply } => {
                let _ = reply.send(self.equivocation.reports().to_vec());
            }
        }
    }

    // ---- view lookup (spec §4.1 "View lookup") ----

    fn locate(&self, height: u64, round: u32) -> Result<Slot, ViewLookupError> {
        if let Some(committing) = &self.committing {
            if height < committing.height() {
                return Err(ViewLookupError::ViewBeforeCommitting);
            }
            if height == committing.height() {
                return Ok(Slot::Committing);
            }
        }
        if height == self.voting.height() {
            if round < self.voting.round() {
                return Err(ViewLookupError::ViewOrphaned);
            }
            if round == self.voting.round() {
                return Ok(Slot::Voting);
            }
            if round == self.next_round.round() {
                return Ok(Slot::NextRound);
            }
            return Err(ViewLookupError::ViewFuture);
        }
        if height > self.voting.height() {
            return Err(ViewLookupError::ViewFuture);
        }
        Err(ViewLookupError::ViewNotFound)
    }

    fn view_mut(&mut self, slot: Slot) -> &mut VersionedRoundView {
        match slot {
            Slot::Committing => self.committing.as_mut().expect("checked by locate()"),
            Slot::Voting => &mut self.voting,
            Slot::NextRound => &mut self.next_round,
        }
    }

    fn view(&self, slot: &Slot) -> &VersionedRoundView {
        match slot {
            Slot::Committing => self.committing.as_ref().expect("checked by locate()"),
            Slot::Voting => &self.voting,
            Slot::NextRound => &self.next_round,
        }
    }

    // ---- HandleProposedHeader (spec §4.1) ----

    fn check_header(&self, height: u64, round: u32) -> HeaderCheck {
        match self.locate(height, round) {
            Ok(slot) => HeaderCheck::Proceed {
                validator_set: self.view(&slot).view.validator_set.clone(),
            },
            Err(ViewLookupError::ViewOrphaned) => HeaderCheck::Reject(ProposedHeaderOutcome::RoundTooOld),
            Err(ViewLookupError::ViewBeforeCommitting) => {
                HeaderCheck::Reject(ProposedHeaderOutcome::RoundTooOld)
            }
            Err(ViewLookupError::ViewFuture) => {
                if height == self.voting.height() + 1 {
                    HeaderCheck::NeedsBackfill
                } else {
                    HeaderCheck::Reject(ProposedHeaderOutcome::RoundTooFarInFuture)
                }
            }
            Err(ViewLookupError::ViewNotFound) => {
                HeaderCheck::Reject(ProposedHeaderOutcome::RoundTooFarInFuture)
            }
        }
    }

    /// Apply a header whose hash, signature, and (for the directly-located
    /// case) proposer membership have already been verified by the caller
    /// (spec §4.1's two-stage design — the kernel only re-checks membership
    /// here for the backfill path, where the correct validator set doesn't
    /// exist until the backfill-triggered shift completes below).
    async fn apply_header(&mut self, header: ProposedHeader) -> ProposedHeaderOutcome {
        let slot = match self.locate(header.header.height, header.round) {
            Ok(slot) => slot,
            Err(ViewLookupError::ViewFuture) if header.header.height == self.voting.height() + 1 => {
                return Box::pin(self.backfill_and_recheck(header)).await;
            }
            Err(_) => return ProposedHeaderOutcome::RoundTooOld,
        };
        if self.view(&slot).view.validator_set.index_of(&header.proposer_pub_key).is_none() {
            return ProposedHeaderOutcome::SignerUnrecognized;
        }

        let view = self.view_mut(slot);
        if view
            .view
            .proposed_headers
            .iter()
            .any(|ph| ph.header.hash == header.header.hash && ph.round == header.round)
        {
            return ProposedHeaderOutcome::AlreadyStored;
        }
        view.view.proposed_headers.push(header.clone());
        view.touch();
        if self.stores.rounds.save_proposed_header(header).await.is_err() {
            return ProposedHeaderOutcome::InternalError;
        }
        if self.maybe_shift_to_committing().await.is_err() {
            return ProposedHeaderOutcome::InternalError;
        }
        self.notify_changed();
        ProposedHeaderOutcome::Accepted
    }

    /// spec §4.1 "Backfill commit proof" / §8 scenario 4: a header for
    /// `voting_height + 1` carries precommits that finish the *voting*
    /// height's proof. Feed them through the normal precommit-apply path
    /// (so a real shift to Committing can fire), then restart the header
    /// handling.
    async fn backfill_and_recheck(&mut self, header: ProposedHeader) -> ProposedHeaderOutcome {
        let Some(commit_proof) = header.header.prev_commit_proof.clone() else {
            return ProposedHeaderOutcome::BadPrevCommitVoteCount;
        };
        if let Err(outcome) = self.backfill_commit_proof(&commit_proof).await {
            return outcome;
        }
        match self.locate(header.header.height, header.round) {
            Ok(_) => Box::pin(self.apply_header(header)).await,
            Err(_) => ProposedHeaderOutcome::RoundTooFarInFuture,
        }
    }

    async fn backfill_commit_proof(&mut self, commit_proof: &CommitProof) -> Result<(), ProposedHeaderOutcome> {
        if commit_proof.pub_key_hash != self.voting.view.validator_set.pub_key_hash() {
            return Err(ProposedHeaderOutcome::BadPrevCommitProofPubKeyHash);
        }
        let candidates: Vec<_> = self
            .voting
            .view
            .validator_set
            .validators()
            .iter()
            .map(|v| v.pub_key.clone())
            .collect();
        let voting_height = self.voting.height();

        for (maybe_hash, sparse) in &commit_proof.proofs {
            let Some(block_hash) = maybe_hash else { continue };
            let message = VoteTarget {
                height: voting_height,
                round: commit_proof.round,
                block_hash: Some(*block_hash),
            }
            .sign_bytes(VoteKind::Precommit);
            let scheme = &self.scheme;
            let proof = self
                .voting
                .view
                .precommit_proofs
                .entry(*block_hash)
                .or_insert_with(|| scheme.new_proof(message.clone(), candidates.clone(), commit_proof.pub_key_hash));
            match proof.merge_sparse(&**scheme, sparse) {
                Ok(result) if result.increased_signatures => {
                    self.voting.bump_precommit(*block_hash);
                }
                Ok(_) => {}
                Err(_) => return Err(ProposedHeaderOutcome::BadPrevCommitProofSignature),
            }
        }
        self.voting.view.recompute_vote_summary();
        let threshold = byzantine_majority(self.voting.view.vote_summary.available_power);
        let covered = self
            .voting
            .view
            .vote_summary
            .precommit_block_power
            .values()
            .any(|p| *p >= threshold);
        if !covered {
            return Err(ProposedHeaderOutcome::BadPrevCommitVoteCount);
        }
        if self.maybe_shift_to_committing().await.is_err() {
            return Err(ProposedHeaderOutcome::InternalError);
        }
        self.notify_changed();
        Ok(())
    }

    // ---- HandlePrevoteProofs / HandlePrecommitProofs (spec §4.1) ----

    fn snapshot_votes(
        &self,
        height: u64,
        round: u32,
        kind: VoteKind,
    ) -> Result<VoteSnapshot, VoteProofOutcome> {
        let slot = self.locate(height, round).map_err(|e| match e {
            ViewLookupError::ViewOrphaned | ViewLookupError::ViewBeforeCommitting => {
                VoteProofOutcome::RoundTooOld
            }
            ViewLookupError::ViewFuture | ViewLookupError::ViewNotFound => {
                VoteProofOutcome::FutureUnverified
            }
        })?;
        let view = self.view(&slot);
        let proofs = match kind {
            VoteKind::Prevote => view.view.prevote_proofs.clone(),
            VoteKind::Precommit => view.view.precommit_proofs.clone(),
        };
        let prev_versions = match kind {
            VoteKind::Prevote => view.prevote_block_versions.clone(),
            VoteKind::Precommit => view.precommit_block_versions.clone(),
        };
        Ok(VoteSnapshot {
            proofs,
            prev_versions,
            candidates: view
                .view
                .validator_set
                .validators()
                .iter()
                .map(|v| v.pub_key.clone())
                .collect(),
            pub_key_hash: view.view.validator_set.pub_key_hash(),
        })
    }

    async fn apply_votes(
        &mut self,
        height: u64,
        round: u32,
        kind: VoteKind,
        merged: HashMap<Digest, crate::scheme::FullProof>,
        prev_versions: HashMap<Digest, u64>,
    ) -> VoteApplyOutcome {
        let slot = match self.locate(height, round) {
            Ok(slot) => slot,
            Err(_) => return VoteApplyOutcome::Applied(VoteProofOutcome::RoundTooOld),
        };
        let is_voting = matches!(slot, Slot::Voting);
        let view = self.view_mut(slot);
        let current_versions = match kind {
            VoteKind::Prevote => &view.prevote_block_versions,
            VoteKind::Precommit => &view.precommit_block_versions,
        };
        for (hash, expected) in &prev_versions {
            let actual = current_versions.get(hash).copied().unwrap_or(0);
            if actual != *expected {
                return VoteApplyOutcome::Conflict;
            }
        }

        let mut increased_any = false;
        for (hash, incoming) in merged {
            let target_map = match kind {
                VoteKind::Prevote => &mut view.view.prevote_proofs,
                VoteKind::Precommit => &mut view.view.precommit_proofs,
            };
            let before = target_map.get(&hash).map(|p| p.popcount()).unwrap_or(0);
            let entry = target_map.entry(hash).or_insert_with(|| incoming.clone());
            if before > 0 {
                entry.merge(&incoming);
            }
            let after = entry.popcount();
            if after > before {
                increased_any = true;
                match kind {
                    VoteKind::Prevote => view.bump_prevote(hash),
                    VoteKind::Precommit => view.bump_precommit(hash),
                }
            }
        }

        if !increased_any {
            return VoteApplyOutcome::Applied(VoteProofOutcome::NoNewSignatures);
        }
        view.view.recompute_vote_summary();

        if kind == VoteKind::Precommit {
            self.scan_equivocation(height, round);
        }
        if is_voting && self.maybe_shift_to_committing().await.is_err() {
            return VoteApplyOutcome::Applied(VoteProofOutcome::InternalError);
        }
        self.notify_changed();
        VoteApplyOutcome::Applied(VoteProofOutcome::Accepted)
    }

    /// Cross-reference every signer across this slot's precommit proofs:
    /// a validator that signed two distinct blocks (or a block and nil) at
    /// the same (height, round) is passively reported, never punished
    /// (spec §1 Non-goals).
    fn scan_equivocation(&mut self, height: u64, round: u32) {
        let Ok(slot) = self.locate(height, round) else { return };
        let view = self.view(&slot);
        let by_signer: HashMap<crate::validator::PubKey, Vec<Digest>> = {
            let mut map: HashMap<crate::validator::PubKey, Vec<Digest>> = HashMap::new();
            for (hash, proof) in &view.view.precommit_proofs {
                for signer in proof.signers() {
                    map.entry(signer.clone()).or_default().push(*hash);
                }
            }
            map
        };
        for (signer, hashes) in by_signer {
            for hash in hashes {
                self.equivocation.observe_precommit(height, round, &signer, hash);
            }
        }
    }

    async fn apply_local_action(&mut self, action: Action) {
        match action {
            Action::Proposal(ph) => {
                let _ = self.apply_header(ph).await;
            }
            Action::Prevote { height, round, block_hash, signature } => {
                self.apply_own_vote(height, round, VoteKind::Prevote, block_hash, signature).await;
            }
            Action::Precommit { height, round, block_hash, signature } => {
                self.apply_own_vote(height, round, VoteKind::Precommit, block_hash, signature).await;
            }
        }
    }

    /// Fold in a vote produced by our own local state machine. Nil votes
    /// are recorded under `Digest::ZERO`, the reserved nil key (spec §3;
    /// see [`crate::validator::Digest`]'s doc comment), so
    /// `RoundView::has_nil_precommit_majority` sees them.
    async fn apply_own_vote(
        &mut self,
        height: u64,
        round: u32,
        kind: VoteKind,
        block_hash: Option<Digest>,
        signature: crate::scheme::Signature,
    ) {
        let Some(pub_key) = self.sm.as_ref().and_then(|e| e.pub_key.clone()) else { return };
        let Ok(slot) = self.locate(height, round) else { return };
        let hash = block_hash.unwrap_or(Digest::ZERO);
        let view = self.view_mut(slot);
        let candidates: Vec<_> = view
            .view
            .validator_set
            .validators()
            .iter()
            .map(|v| v.pub_key.clone())
            .collect();
        let pub_key_hash = view.view.validator_set.pub_key_hash();
        let message = VoteTarget { height, round, block_hash }.sign_bytes(kind);
        let target_map = match kind {
            VoteKind::Prevote => &mut view.view.prevote_proofs,
            VoteKind::Precommit => &mut view.view.precommit_proofs,
        };
        let scheme = &self.scheme;
        let entry = target_map
            .entry(hash)
            .or_insert_with(|| scheme.new_proof(message, candidates, pub_key_hash));
        if entry.add_signature(&**scheme, signature, &pub_key).is_err() {
            return;
        }
        view.view.recompute_vote_summary();
        match kind {
            VoteKind::Prevote => view.bump_prevote(hash),
            VoteKind::Precommit => view.bump_precommit(hash),
        }
        if let Err(err) = self.maybe_shift_to_committing().await {
            warn!(%err, "failed to shift to committing after applying own vote");
            return;
        }
        self.notify_changed();
    }

    // ---- shifts (spec §4.1 "Shift Voting -> Committing", "Advance voting round") ----

    /// spec §4.1(c): on commit, the new Voting view at height+1 is built
    /// from the *next* validator set carried on the committed header, not
    /// the set that was already voting — resolved via the validator store
    /// before any state is mutated, so a failed lookup leaves the kernel
    /// untouched.
    async fn maybe_shift_to_committing(&mut self) -> Result<(), MirrorError> {
        let Some(committed_block) = self.voting.view.committed_block() else {
            if self.voting.view.has_nil_precommit_majority() {
                self.advance_voting_round();
            }
            return Ok(());
        };

        let committed_header = self
            .voting
            .view
            .proposed_headers
            .iter()
            .find(|h| h.header.hash == committed_block)
            .map(|h| (*h.header).clone())
            .ok_or_else(|| {
                MirrorError::Internal(format!("committed block {committed_block:?} has no stored header"))
            })?;
        let next_validator_set = self
            .stores
            .validators
            .validator_set_by_hash(committed_header.next_validator_set_hash)
            .await?
            .ok_or_else(|| {
                MirrorError::Internal(format!(
                    "unknown next validator set hash {:?}",
                    committed_header.next_validator_set_hash
                ))
            })?;
        let next_validator_set = Arc::new(next_validator_set);

        info!(height = self.voting.height(), round = self.voting.round(), "shifting to committing");

        if let Some(prev_committing) = &self.committing {
            self.pending_session_changes.push(RoundSessionChange {
                height: prev_committing.height(),
                round: prev_committing.round(),
                state: RoundSessionState::Grace,
            });
        }
        self.pending_session_changes.push(RoundSessionChange {
            height: self.next_round.height(),
            round: self.next_round.round(),
            state: RoundSessionState::Expired,
        });

        let new_voting_height = self.voting.height() + 1;
        let precommit_proofs_for_carry = self.voting.view.precommit_proofs.clone();
        let committed_round = self.voting.view.round;
        let committing_pub_key_hash = self.voting.view.validator_set.pub_key_hash();

        let new_committing = std::mem::replace(
            &mut self.voting,
            VersionedRoundView::new(RoundView::new(new_voting_height, 0, next_validator_set, None)),
        );
        let committing_height = new_committing.height();
        self.committing = Some(new_committing);

        if let Some(proof) = precommit_proofs_for_carry.get(&committed_block) {
            let mut proofs = HashMap::new();
            proofs.insert(Some(committed_block), proof.as_sparse());
            let commit_proof = CommitProof {
                round: committed_round,
                pub_key_hash: committing_pub_key_hash,
                proofs,
            };
            self.committed_proofs.insert(committing_height, commit_proof.clone());
            self.voting.view.prev_commit_proof = Some(commit_proof);
        }
        self.stores.committed_headers.save_committed_header(committed_header).await?;

        self.next_round = VersionedRoundView::new(RoundView::new(
            new_voting_height,
            1,
            self.voting.view.validator_set.clone(),
            None,
        ));

        self.pending_session_changes.push(RoundSessionChange {
            height: self.voting.height(),
            round: self.voting.round(),
            state: RoundSessionState::Active,
        });
        self.pending_session_changes.push(RoundSessionChange {
            height: self.next_round.height(),
            round: self.next_round.round(),
            state: RoundSessionState::Active,
        });

        if let Some(entrance) = &mut self.sm {
            if entrance.height == committing_height {
                if let Some(tx) = entrance.height_committed_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
        Ok(())
    }

    fn advance_voting_round(&mut self) {
        debug!(height = self.voting.height(), round = self.voting.round(), "advancing voting round, no winner");
        self.nil_voted_round = Some(self.voting.snapshot());
        self.pending_session_changes.push(RoundSessionChange {
            height: self.voting.height(),
            round: self.voting.round(),
            state: RoundSessionState::Expired,
        });
        let next = std::mem::replace(
            &mut self.next_round,
            VersionedRoundView::new(RoundView::new(
                self.voting.height(),
                self.voting.round() + 2,
                self.voting.view.validator_set.clone(),
                None,
            )),
        );
        self.voting = next;
        self.notify_changed();
    }

    // ---- round entrance / outbound updates ----

    /// spec §4.2 "Round entrance" / §8 scenario 6 "Catchup via replay": a
    /// state machine entering at or behind the Committing height has
    /// nothing left to vote on — it gets the already-decided header and
    /// commit proof instead of a live view to join.
    async fn handle_round_entrance(&mut self, entrance: RoundEntrance) {
        let RoundEntrance {
            height,
            round,
            pub_key,
            actions_rx,
            height_committed_tx,
            response_tx,
            update_tx,
        } = entrance;

        let behind_committing = self.committing.as_ref().is_some_and(|c| height < c.height());
        if behind_committing {
            if let (Ok(Some(committed_header)), Some(commit_proof)) = (
                self.stores.committed_headers.committed_header(height).await,
                self.committed_proofs.get(&height).cloned(),
            ) {
                let _ = response_tx.send(RoundEntranceResponse::Replay { committed_header, commit_proof });
                return;
            }
        }

        let slot = self.locate(height, round);
        let vrv_snapshot = match slot {
            Ok(slot) => self.view(&slot).snapshot(),
            Err(_) => self.voting.snapshot(),
        };
        let smrv = StateMachineRoundView { vrv: vrv_snapshot, jump_ahead_round_view: None };
        let _ = response_tx.send(RoundEntranceResponse::Join(Box::new(smrv)));

        self.sm = Some(SmEntrance {
            height,
            round,
            pub_key,
            actions_rx,
            height_committed_tx,
            update_tx,
        });
    }

    /// Fire both outbound channels after any mutation: the gossip strategy
    /// (spec §6 "Gossip strategy channel") and, if a state machine is
    /// occupying a round, its own live view + jump-ahead (spec §4.2
    /// "Jump-ahead").
    fn notify_changed(&mut self) {
        self.emit_gossip_update();
        self.push_state_machine_update();
    }

    fn emit_gossip_update(&mut self) {
        let update = NetworkViewUpdate {
            committing: self.committing.as_ref().map(|v| v.snapshot()),
            voting: Some(self.voting.snapshot()),
            next_round: Some(self.next_round.snapshot()),
            nil_voted_round: self.nil_voted_round.take(),
            round_session_changes: std::mem::take(&mut self.pending_session_changes),
        };
        let _ = self.gossip_tx.try_send(update);
    }

    /// spec §4.2 "Jump-ahead": if the canonical voting round has moved
    /// past the state machine's current round at the same height, deliver
    /// the later view alongside so the state machine can skip ahead
    /// without re-submitting actions for the skipped round.
    fn push_state_machine_update(&mut self) {
        let Some(entrance) = &self.sm else { return };
        let (height, round) = (entrance.height, entrance.round);
        let slot = match self.locate(height, round) {
            Ok(slot) => slot,
            Err(_) => return,
        };
        let vrv = self.view(&slot).snapshot();
        let jump_ahead_round_view = if self.voting.height() == height && self.voting.round() > round
        {
            Some(JumpAheadRoundView { view: self.voting.snapshot() })
        } else {
            None
        };
        let smrv = StateMachineRoundView { vrv, jump_ahead_round_view };
        let entrance = self.sm.as_ref().expect("checked above");
        let _ = entrance.update_tx.try_send(smrv);
    }
}
