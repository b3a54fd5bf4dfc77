//! Cross-component channel messages (spec §6).
//!
//! Every message here is sent on a `tokio::sync::mpsc` or `oneshot`
//! channel; see `mirror::Mirror` and `state_machine::StateMachine` for the
//! endpoints that own the send/receive halves.

use tokio::sync::{mpsc, oneshot};

use crate::header::Header;
use crate::validator::{Digest, PubKey, ValidatorSet};
use crate::vote::CommitProof;
use crate::view::VersionedRoundView;

/// Lifecycle state of a (height, round) slot as reported to the gossip
/// strategy (spec §4.1 "State machine of a (H, R) slot").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundSessionState {
    Active,
    Grace,
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub struct RoundSessionChange {
    pub height: u64,
    pub round: u32,
    pub state: RoundSessionState,
}

/// Outbound update delivered to the (external) gossip strategy. Each
/// sub-view is `Some` only if its version changed since the last update
/// delivered on this channel.
pub struct NetworkViewUpdate {
    pub committing: Option<VersionedRoundView>,
    pub voting: Option<VersionedRoundView>,
    pub next_round: Option<VersionedRoundView>,
    pub nil_voted_round: Option<VersionedRoundView>,
    pub round_session_changes: Vec<RoundSessionChange>,
}

/// A round the State Machine can skip straight to because the Mirror
/// already has its prevote/precommit state (spec §4.2 "Jump-ahead").
pub struct JumpAheadRoundView {
    pub view: VersionedRoundView,
}

/// Delivered to the State Machine on every Mirror-side update relevant to
/// the round it is currently in.
pub struct StateMachineRoundView {
    pub vrv: VersionedRoundView,
    pub jump_ahead_round_view: Option<JumpAheadRoundView>,
}

/// One action the local validator emits toward the Mirror.
#[derive(Debug, Clone)]
pub enum Action {
    Proposal(crate::header::ProposedHeader),
    Prevote {
        height: u64,
        round: u32,
        block_hash: Option<Digest>,
        signature: crate::scheme::Signature,
    },
    Precommit {
        height: u64,
        round: u32,
        block_hash: Option<Digest>,
        signature: crate::scheme::Signature,
    },
}

/// Sent by the State Machine when it wants the Mirror to commit it to a
/// new round. Buffered(3) actions channel, sized for one proposal, one
/// prevote, and one precommit per round (spec §5).
pub struct RoundEntrance {
    pub height: u64,
    pub round: u32,
    pub pub_key: Option<PubKey>,
    /// The State Machine keeps the matching `Sender<Action>` and emits its
    /// proposal/prevote/precommit into it over the round; the Mirror owns
    /// this receiver and folds each action in as it arrives.
    pub actions_rx: Option<mpsc::Receiver<Action>>,
    /// Closed (dropped) by the Mirror when this height commits —
    /// collapses the commit-wait timer early.
    pub height_committed_tx: Option<oneshot::Sender<()>>,
    pub response_tx: oneshot::Sender<RoundEntranceResponse>,
    /// The Mirror pushes every subsequent view update relevant to this
    /// (height, round) here; capacity 1, latest-wins (an update the State
    /// Machine hasn't drained yet may be superseded rather than queued).
    pub update_tx: mpsc::Sender<StateMachineRoundView>,
}

/// The Mirror's reply to a `RoundEntrance`: either join an active round,
/// or catch up by replaying an already-committed header.
pub enum RoundEntranceResponse {
    Join(Box<StateMachineRoundView>),
    Replay {
        committed_header: Header,
        commit_proof: CommitProof,
    },
}

/// Out-of-band signal that block data for a known `data_id` has arrived.
pub struct BlockDataArrived {
    pub height: u64,
    pub round: u32,
    pub data_id: String,
}

/// Driver-facing init-chain request/response (spec §6).
pub struct InitChainRequest {
    pub genesis_validators: ValidatorSet,
    pub response_tx: oneshot::Sender<InitChainResponse>,
}

pub struct InitChainResponse {
    pub app_state_hash: Digest,
    /// Empty means "use genesis validators."
    pub validators: Option<ValidatorSet>,
}

/// Driver-facing finalize-block request/response (spec §6).
pub struct FinalizeBlockRequest {
    pub header: Header,
    pub round: u32,
    pub response_tx: oneshot::Sender<FinalizeBlockResponse>,
}

#[derive(Debug, Clone)]
pub struct FinalizeBlockResponse {
    pub height: u64,
    pub round: u32,
    pub block_hash: Digest,
    pub validators: ValidatorSet,
    pub app_state_hash: Digest,
}

/// Out-of-band lag status toward the driver (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagStatus {
    Initializing,
    UpToDate,
    Behind,
}

#[derive(Debug, Clone, Copy)]
pub struct LagState {
    pub status: LagStatus,
    pub committing_height: u64,
    pub need_height: u64,
}
