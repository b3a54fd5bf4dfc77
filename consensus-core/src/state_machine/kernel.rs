//! The state-machine kernel task: one (height, round) at a time, driven by
//! an entrance protocol, consensus-strategy calls on dedicated tasks, and
//! four named timers (spec §4.2).

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::header::{Header, ProposedHeader};
use crate::messages::{
    Action, BlockDataArrived, FinalizeBlockRequest, FinalizeBlockResponse, InitChainRequest,
    InitChainResponse, LagState, LagStatus, RoundEntranceResponse,
};
use crate::mirror::Mirror;
use crate::scheme::{ConsensusScheme, Signature};
use crate::store::StoredFinalization;
use crate::strategy::{ConsensusStrategy, ConsiderOutcome, ConsiderProposedBlocksReason, StrategyError, TimeoutStrategy};
use crate::validator::{byzantine_majority, Digest, ValidatorSet};
use crate::view::VersionedRoundView;
use crate::vote::{VoteKind, VoteTarget};

use super::steps::Step;
use super::{LocalSigner, StateMachineStores};

enum RoundOutcome {
    AdvanceHeight,
    AdvanceRound,
    JumpAhead(u64, u32),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Proposal,
    PrevoteDelay,
    PrecommitDelay,
    CommitWait,
}

pub(super) struct StateMachineKernel<S: ConsensusScheme> {
    scheme: Arc<S>,
    mirror: Mirror<S>,
    strategy: Arc<dyn ConsensusStrategy>,
    timeouts: Arc<dyn TimeoutStrategy>,
    stores: StateMachineStores,
    signer: Option<LocalSigner>,
    height: u64,
    round: u32,
    validator_set: Option<Arc<ValidatorSet>>,
    /// A validator-set rotation decided by finalizing a past block but not
    /// yet in force — applied at the next height (spec §4.2's one-height
    /// lookahead: by the time a height is proposed, its own validator set
    /// rotation must already be decided, since finalizing that height's
    /// block happens only after it's proposed and voted on).
    next_validator_set: Option<Arc<ValidatorSet>>,
    prev_block_hash: Digest,
    prev_app_state_hash: Digest,
    genesis_done: bool,
    init_chain_tx: mpsc::Sender<InitChainRequest>,
    finalize_block_tx: mpsc::Sender<FinalizeBlockRequest>,
    lag_tx: mpsc::Sender<LagState>,
    block_data_rx: mpsc::Receiver<BlockDataArrived>,
    cancel: CancellationToken,
}

impl<S: ConsensusScheme> StateMachineKernel<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheme: Arc<S>,
        mirror: Mirror<S>,
        strategy: Arc<dyn ConsensusStrategy>,
        timeouts: Arc<dyn TimeoutStrategy>,
        stores: StateMachineStores,
        signer: Option<LocalSigner>,
        start: (u64, u32),
        init_chain_tx: mpsc::Sender<InitChainRequest>,
        finalize_block_tx: mpsc::Sender<FinalizeBlockRequest>,
        lag_tx: mpsc::Sender<LagState>,
        block_data_rx: mpsc::Receiver<BlockDataArrived>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheme,
            mirror,
            strategy,
            timeouts,
            stores,
            signer,
            height: start.0,
            round: start.1,
            validator_set: None,
            next_validator_set: None,
            prev_block_hash: Digest::ZERO,
            prev_app_state_hash: Digest::ZERO,
            genesis_done: false,
            init_chain_tx,
            finalize_block_tx,
            lag_tx,
            block_data_rx,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let _ = self
            .lag_tx
            .try_send(LagState { status: LagStatus::Initializing, committing_height: 0, need_height: self.height });

        let _ = self.lag_tx.try_send(LagState {
            status: LagStatus::UpToDate,
            committing_height: self.height.saturating_sub(1),
            need_height: self.height,
        });

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.run_round().await {
                RoundOutcome::AdvanceHeight => {
                    self.height += 1;
                    self.round = 0;
                    if let Some(next) = self.next_validator_set.take() {
                        self.validator_set = Some(next);
                    }
                }
                RoundOutcome::AdvanceRound => {
                    self.round += 1;
                }
                RoundOutcome::JumpAhead(height, round) => {
                    self.height = height;
                    self.round = round;
                }
                RoundOutcome::Cancelled => return,
            }
            let _ = self
                .stores
                .state_machine
                .save_state_machine_round(self.height, self.round)
                .await;
        }
    }

    /// spec §6 "Driver init-chain channel". Fired once, at genesis. The
    /// Mirror is already constructed with the genesis validator set by the
    /// time this runs, so a driver that returns an overriding validator set
    /// here only affects headers proposed from this point on, not the
    /// Mirror's own view of round zero.
    async fn init_chain(&mut self, validator_set: Arc<ValidatorSet>) {
        let (response_tx, response_rx) = oneshot::channel();
        let request = InitChainRequest { genesis_validators: (*validator_set).clone(), response_tx };
        if self.init_chain_tx.send(request).await.is_err() {
            return;
        }
        if let Ok(InitChainResponse { app_state_hash, validators }) = response_rx.await {
            self.prev_app_state_hash = app_state_hash;
            if let Some(validators) = validators {
                self.validator_set = Some(Arc::new(validators));
            }
        }
    }

    async fn run_round(&mut self) -> RoundOutcome {
        let pub_key = self.signer.as_ref().map(|s| s.pub_key.clone());
        let (actions_tx, mut height_committed_rx, response, mut update_rx) =
            self.mirror.enter_round(self.height, self.round, pub_key).await;

        let mut vrv = match response {
            RoundEntranceResponse::Join(smrv) => {
                if let Some(jump) = smrv.jump_ahead_round_view {
                    return RoundOutcome::JumpAhead(jump.view.height(), jump.view.round());
                }
                smrv.vrv
            }
            RoundEntranceResponse::Replay { committed_header, commit_proof } => {
                self.replay_committed(committed_header, commit_proof.round).await;
                return RoundOutcome::AdvanceHeight;
            }
        };

        if self.validator_set.is_none() {
            self.validator_set = Some(vrv.view.validator_set.clone());
        }
        if !self.genesis_done && self.height == 1 && self.round == 0 {
            self.genesis_done = true;
            let validator_set = self.validator_set.clone().expect("just set above");
            self.init_chain(validator_set).await;
        }

        info!(height = self.height, round = self.round, "entered round");

        let mut step = Step::AwaitingProposal;
        let mut our_prevote: Option<Option<Digest>> = None;
        let mut our_precommit: Option<Option<Digest>> = None;
        let mut finalize_done = false;
        let mut commit_wait_done = false;
        let mut known_hashes: HashSet<Digest> =
            vrv.view.proposed_headers.iter().map(|h| h.header.hash).collect();

        // A previously recorded vote only ever tells us "voted for this
        // block"; the store can't distinguish "voted nil" from "never
        // voted" (both read back as `None`), so a restart mid-round after a
        // nil vote re-decides it rather than replaying it.
        if let Ok(Some(stored)) = self.stores.actions.our_prevote(self.height, self.round).await {
            our_prevote = Some(Some(stored));
        }
        if let Ok(Some(stored)) = self.stores.actions.our_precommit(self.height, self.round).await {
            our_precommit = Some(Some(stored));
        }

        let (proposal_tx, mut proposal_rx) = mpsc::channel(1);
        {
            let strategy = self.strategy.clone();
            let (height, round) = (self.height, self.round);
            tokio::spawn(async move {
                strategy.enter_round(height, round, proposal_tx).await;
            });
        }

        let mut timer: Option<Pin<Box<Sleep>>> = None;
        let mut timer_kind: Option<TimerKind> = None;
        if our_precommit.is_some() {
            step = Step::AwaitingPrecommits;
            self.arm(&mut timer, &mut timer_kind, TimerKind::PrecommitDelay);
        } else if our_prevote.is_some() {
            step = Step::AwaitingPrevotes;
            self.arm(&mut timer, &mut timer_kind, TimerKind::PrevoteDelay);
        } else {
            self.arm(&mut timer, &mut timer_kind, TimerKind::Proposal);
        }

        let mut pending_consider: Option<oneshot::Receiver<ConsiderOutcome>> = None;
        let mut pending_choose: Option<oneshot::Receiver<Result<Option<Digest>, StrategyError>>> = None;
        let mut pending_decide: Option<oneshot::Receiver<Result<Option<Digest>, StrategyError>>> = None;
        let mut finalize_rx: Option<oneshot::Receiver<FinalizeBlockResponse>> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return RoundOutcome::Cancelled,

                _ = async { timer.as_mut().expect("guarded").as_mut().await }, if timer.is_some() => {
                    let kind = timer_kind.take();
                    timer = None;
                    match kind {
                        Some(TimerKind::Proposal) => {
                            if our_prevote.is_none() && pending_choose.is_none() {
                                let headers = self.acceptable_headers(&vrv);
                                pending_choose = Some(self.spawn_choose(headers));
                            }
                        }
                        Some(TimerKind::PrevoteDelay) => {
                            if our_precommit.is_none() && pending_decide.is_none() {
                                pending_decide = Some(self.spawn_decide(vrv.view.vote_summary.clone()));
                            }
                        }
                        Some(TimerKind::PrecommitDelay) => {
                            return RoundOutcome::AdvanceRound;
                        }
                        Some(TimerKind::CommitWait) => {
                            commit_wait_done = true;
                            if finalize_done {
                                return RoundOutcome::AdvanceHeight;
                            }
                            step = Step::AwaitingFinalization;
                        }
                        None => {}
                    }
                }

                Some(update) = update_rx.recv() => {
                    if let Some(jump) = update.jump_ahead_round_view {
                        return RoundOutcome::JumpAhead(jump.view.height(), jump.view.round());
                    }
                    vrv = update.vrv;

                    let fresh: Vec<Digest> = vrv.view.proposed_headers.iter()
                        .map(|h| h.header.hash)
                        .filter(|h| !known_hashes.contains(h))
                        .collect();
                    for h in &fresh { known_hashes.insert(*h); }

                    if step == Step::AwaitingProposal && our_prevote.is_none() {
                        let total = vrv.view.vote_summary.total_prevote_power;
                        let majority_present = total >= byzantine_majority(vrv.view.vote_summary.available_power);
                        if majority_present && pending_choose.is_none() {
                            let headers = self.acceptable_headers(&vrv);
                            pending_choose = Some(self.spawn_choose(headers));
                        } else if !fresh.is_empty() && pending_consider.is_none() {
                            let headers = self.acceptable_headers(&vrv);
                            let reason = ConsiderProposedBlocksReason {
                                new_block_hashes: fresh,
                                updated_block_data_ids: Vec::new(),
                                majority_voting_power_present: majority_present,
                            };
                            pending_consider = Some(self.spawn_consider(headers, reason));
                        }
                    }

                    if step == Step::AwaitingPrevotes && our_precommit.is_none() && pending_decide.is_none() {
                        let crossed = byzantine_majority(vrv.view.vote_summary.available_power);
                        let single_block_majority = vrv.view.vote_summary.prevote_block_power
                            .values().any(|p| *p >= crossed);
                        if single_block_majority {
                            pending_decide = Some(self.spawn_decide(vrv.view.vote_summary.clone()));
                        }
                    }

                    if step == Step::AwaitingPrecommits {
                        if let Some(hash) = vrv.view.committed_block() {
                            if let Some(header) = vrv.view.proposed_headers.iter().find(|h| h.header.hash == hash) {
                                step = Step::CommitWait;
                                self.arm(&mut timer, &mut timer_kind, TimerKind::CommitWait);
                                let header = (*header.header).clone();
                                finalize_rx = Some(self.spawn_finalize(header, self.round).await);
                            }
                        } else if vrv.view.has_nil_precommit_majority() {
                            return RoundOutcome::AdvanceRound;
                        }
                    }
                }

                Some(proposal) = proposal_rx.recv() => {
                    let proposal_annotations = proposal.proposal_annotations.clone();
                    if let Some(header) = self.build_header(&vrv, proposal) {
                        if let Some(signed) = self.sign_proposal(header, self.round, proposal_annotations) {
                            known_hashes.insert(signed.header.hash);
                            let _ = actions_tx.send(Action::Proposal(signed)).await;
                        }
                    }
                }

                Some(event) = self.block_data_rx.recv() => {
                    if event.height == self.height && event.round == self.round
                        && step == Step::AwaitingProposal && our_prevote.is_none()
                    {
                        let matched = vrv.view.proposed_headers.iter().any(|h| h.header.data_id == event.data_id);
                        if matched && pending_consider.is_none() {
                            let headers = self.acceptable_headers(&vrv);
                            let reason = ConsiderProposedBlocksReason {
                                new_block_hashes: Vec::new(),
                                updated_block_data_ids: vec![event.data_id],
                                majority_voting_power_present: vrv.view.vote_summary.total_prevote_power
                                    >= byzantine_majority(vrv.view.vote_summary.available_power),
                            };
                            pending_consider = Some(self.spawn_consider(headers, reason));
                        }
                    }
                }

                result = async { pending_consider.as_mut().expect("guarded").await }, if pending_consider.is_some() => {
                    pending_consider = None;
                    if let Ok(ConsiderOutcome::Choose(hash)) = result {
                        if our_prevote.is_none() {
                            self.cast_prevote(&actions_tx, hash, &mut our_prevote, &mut step, &mut timer, &mut timer_kind).await;
                        }
                    }
                }

                result = async { pending_choose.as_mut().expect("guarded").await }, if pending_choose.is_some() => {
                    pending_choose = None;
                    match result {
                        Ok(Ok(hash)) if our_prevote.is_none() => {
                            self.cast_prevote(&actions_tx, hash, &mut our_prevote, &mut step, &mut timer, &mut timer_kind).await;
                        }
                        Ok(Err(StrategyError::Failed(reason))) => {
                            warn!(height = self.height, round = self.round, %reason, "choose_proposed_block failed");
                        }
                        _ => {}
                    }
                }

                result = async { pending_decide.as_mut().expect("guarded").await }, if pending_decide.is_some() => {
                    pending_decide = None;
                    match result {
                        Ok(Ok(hash)) if our_precommit.is_none() => {
                            self.cast_precommit(&actions_tx, hash, &mut our_precommit, &mut step, &mut timer, &mut timer_kind).await;
                        }
                        Ok(Err(StrategyError::Failed(reason))) => {
                            warn!(height = self.height, round = self.round, %reason, "decide_precommit failed");
                        }
                        _ => {}
                    }
                }

                result = async { finalize_rx.as_mut().expect("guarded").await }, if finalize_rx.is_some() => {
                    finalize_rx = None;
                    if let Ok(response) = result {
                        self.on_finalized(response).await;
                        finalize_done = true;
                        if commit_wait_done {
                            return RoundOutcome::AdvanceHeight;
                        }
                    }
                }

                _ = &mut height_committed_rx, if !commit_wait_done && step == Step::CommitWait => {
                    commit_wait_done = true;
                    if finalize_done {
                        return RoundOutcome::AdvanceHeight;
                    }
                }
            }
        }
    }

    fn acceptable_headers(&self, vrv: &VersionedRoundView) -> Vec<ProposedHeader> {
        let Some(validator_set) = &self.validator_set else {
            return Vec::new();
        };
        vrv.view
            .proposed_headers
            .iter()
            .filter(|h| {
                h.header.prev_block_hash == self.prev_block_hash
                    && h.header.validator_set_hash == validator_set.pub_key_hash()
            })
            .cloned()
            .collect()
    }

    fn spawn_consider(
        &self,
        headers: Vec<ProposedHeader>,
        reason: ConsiderProposedBlocksReason,
    ) -> oneshot::Receiver<ConsiderOutcome> {
        let (tx, rx) = oneshot::channel();
        let strategy = self.strategy.clone();
        tokio::spawn(async move {
            let outcome = strategy.consider_proposed_blocks(&headers, reason).await;
            let _ = tx.send(outcome);
        });
        rx
    }

    fn spawn_choose(&self, headers: Vec<ProposedHeader>) -> oneshot::Receiver<Result<Option<Digest>, StrategyError>> {
        let (tx, rx) = oneshot::channel();
        let strategy = self.strategy.clone();
        tokio::spawn(async move {
            let outcome = strategy.choose_proposed_block(&headers).await;
            let _ = tx.send(outcome);
        });
        rx
    }

    fn spawn_decide(
        &self,
        summary: crate::view::VoteSummary,
    ) -> oneshot::Receiver<Result<Option<Digest>, StrategyError>> {
        let (tx, rx) = oneshot::channel();
        let strategy = self.strategy.clone();
        tokio::spawn(async move {
            let outcome = strategy.decide_precommit(&summary).await;
            let _ = tx.send(outcome);
        });
        rx
    }

    async fn spawn_finalize(&self, header: Header, round: u32) -> oneshot::Receiver<FinalizeBlockResponse> {
        let (tx, rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        let request = FinalizeBlockRequest { header, round, response_tx };
        if self.finalize_block_tx.send(request).await.is_err() {
            drop(tx);
            return rx;
        }
        tokio::spawn(async move {
            if let Ok(response) = response_rx.await {
                let _ = tx.send(response);
            }
        });
        rx
    }

    #[allow(clippy::too_many_arguments)]
    async fn cast_prevote(
        &self,
        actions_tx: &mpsc::Sender<Action>,
        block_hash: Option<Digest>,
        our_prevote: &mut Option<Option<Digest>>,
        step: &mut Step,
        timer: &mut Option<Pin<Box<Sleep>>>,
        timer_kind: &mut Option<TimerKind>,
    ) {
        *our_prevote = Some(block_hash);
        let _ = self.stores.actions.record_prevote(self.height, self.round, block_hash).await;
        if let Some(signer) = &self.signer {
            let message = VoteTarget { height: self.height, round: self.round, block_hash }.sign_bytes(VoteKind::Prevote);
            let signature: Signature = self.scheme.sign(&message, &signer.secret_key);
            let _ = actions_tx
                .send(Action::Prevote { height: self.height, round: self.round, block_hash, signature })
                .await;
        }
        *step = Step::AwaitingPrevotes;
        self.arm(timer, timer_kind, TimerKind::PrevoteDelay);
    }

    #[allow(clippy::too_many_arguments)]
    async fn cast_precommit(
        &self,
        actions_tx: &mpsc::Sender<Action>,
        block_hash: Option<Digest>,
        our_precommit: &mut Option<Option<Digest>>,
        step: &mut Step,
        timer: &mut Option<Pin<Box<Sleep>>>,
        timer_kind: &mut Option<TimerKind>,
    ) {
        *our_precommit = Some(block_hash);
        let _ = self.stores.actions.record_precommit(self.height, self.round, block_hash).await;
        if let Some(signer) = &self.signer {
            let message = VoteTarget { height: self.height, round: self.round, block_hash }.sign_bytes(VoteKind::Precommit);
            let signature: Signature = self.scheme.sign(&message, &signer.secret_key);
            let _ = actions_tx
                .send(Action::Precommit { height: self.height, round: self.round, block_hash, signature })
                .await;
        }
        *step = Step::AwaitingPrecommits;
        self.arm(timer, timer_kind, TimerKind::PrecommitDelay);
    }

    fn arm(&self, timer: &mut Option<Pin<Box<Sleep>>>, timer_kind: &mut Option<TimerKind>, kind: TimerKind) {
        let duration = match kind {
            TimerKind::Proposal => self.timeouts.proposal_timeout(self.height, self.round),
            TimerKind::PrevoteDelay => self.timeouts.prevote_delay(self.height, self.round),
            TimerKind::PrecommitDelay => self.timeouts.precommit_delay(self.height, self.round),
            TimerKind::CommitWait => self.timeouts.commit_wait(self.height, self.round),
        };
        debug!(height = self.height, round = self.round, ?kind, ?duration, "arming timer");
        *timer = Some(Box::pin(tokio::time::sleep(duration)));
        *timer_kind = Some(kind);
    }

    fn build_header(&self, vrv: &VersionedRoundView, proposal: crate::strategy::Proposal) -> Option<Header> {
        let validator_set = self.validator_set.clone()?;
        let next_validator_set = self.next_validator_set.clone().unwrap_or_else(|| validator_set.clone());
        Some(Header::new(
            &*self.scheme,
            self.height,
            self.prev_block_hash,
            vrv.view.prev_commit_proof.clone(),
            &validator_set,
            &next_validator_set,
            proposal.data_id,
            self.prev_app_state_hash,
            proposal.block_annotations,
        ))
    }

    fn sign_proposal(&self, header: Header, round: u32, proposal_annotations: crate::header::Annotations) -> Option<ProposedHeader> {
        let signer = self.signer.as_ref()?;
        let mut proposed = ProposedHeader {
            header: Arc::new(header),
            round,
            proposer_pub_key: signer.pub_key.clone(),
            proposal_annotations,
            signature: Signature(Vec::new()),
        };
        let bytes = proposed.sign_bytes();
        proposed.signature = self.scheme.sign(&bytes, &signer.secret_key);
        Some(proposed)
    }

    async fn on_finalized(&mut self, response: FinalizeBlockResponse) {
        info!(height = response.height, round = response.round, "block finalized");
        let finalization = StoredFinalization {
            height: response.height,
            round: response.round,
            block_hash: response.block_hash,
            app_state_hash: response.app_state_hash,
        };
        if let Err(err) = self.stores.finalizations.save_finalization(finalization).await {
            warn!(height = response.height, %err, "failed to persist finalization");
        }
        self.prev_block_hash = response.block_hash;
        self.prev_app_state_hash = response.app_state_hash;
        let next_validator_set = Arc::new(response.validators);
        if let Err(err) = self.stores.validators.save_validator_set((*next_validator_set).clone()).await {
            warn!(height = response.height, %err, "failed to persist rotated validator set");
        }
        self.next_validator_set = Some(next_validator_set);
    }

    /// spec §4.2 "replay mode": a committed header arrived directly from
    /// the Mirror because we entered at or behind the Committing height.
    /// Only a finalize request is emitted; no timers run.
    async fn replay_committed(&mut self, header: Header, round: u32) {
        let block_hash = header.hash;
        let app_state_hash = header.prev_app_state_hash;
        let rx = self.spawn_finalize(header, round).await;
        if let Ok(response) = rx.await {
            self.on_finalized(response).await;
        } else {
            // Driver declined to finalize a replayed header; keep our local
            // pointers consistent with what the Mirror already committed so
            // the next round entrance doesn't re-derive a stale prev-hash.
            self.prev_block_hash = block_hash;
            self.prev_app_state_hash = app_state_hash;
        }
    }
}
