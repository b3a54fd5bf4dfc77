//! Pluggable collaborators the State Machine calls out to: the consensus
//! strategy (spec §4.2 "Consensus-strategy calls") and the timeout
//! strategy (spec §4.2 "Timers").

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::header::{Annotations, ProposedHeader};
use crate::validator::Digest;
use crate::view::VoteSummary;

/// What the strategy may emit once per round entrance.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub data_id: String,
    pub block_annotations: Annotations,
    pub proposal_annotations: Annotations,
}

/// Why `consider_proposed_blocks` is being called again (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct ConsiderProposedBlocksReason {
    pub new_block_hashes: Vec<Digest>,
    pub updated_block_data_ids: Vec<String>,
    pub majority_voting_power_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsiderOutcome {
    Choose(Option<Digest>),
    NotReady,
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("strategy failed: {0}")]
    Failed(String),
}

/// The local validator's decision-making collaborator. Run on a dedicated
/// task by the State Machine so a slow strategy never blocks its kernel
/// loop (spec §4.2, §5).
#[async_trait]
pub trait ConsensusStrategy: Send + Sync + 'static {
    /// Called once per round entrance. The strategy may send at most one
    /// [`Proposal`] on `proposal_tx`; dropping the sender without sending
    /// means "no proposal this round."
    async fn enter_round(&self, height: u64, round: u32, proposal_tx: mpsc::Sender<Proposal>);

    /// Called on each view update that adds acceptable proposed headers,
    /// or when block data arrives for a known `data_id`.
    async fn consider_proposed_blocks(
        &self,
        headers: &[ProposedHeader],
        reason: ConsiderProposedBlocksReason,
    ) -> ConsiderOutcome;

    /// Called when a choice must be made: the proposal timer elapsed, or
    /// Byzantine-majority prevotes were observed without a local prevote
    /// yet. `Ok(None)` means prevote nil.
    async fn choose_proposed_block(
        &self,
        headers: &[ProposedHeader],
    ) -> Result<Option<Digest>, StrategyError>;

    /// Called once Byzantine-majority prevotes have crossed threshold, or
    /// on prevote-delay elapse. `Ok(None)` means precommit nil.
    async fn decide_precommit(&self, summary: &VoteSummary) -> Result<Option<Digest>, StrategyError>;
}

/// Durations for the four named timers (spec §4.2). Implementations may
/// vary the duration by round (e.g. linear backoff) — see
/// `config::ConsensusCoreConfig` for the default.
pub trait TimeoutStrategy: Send + Sync + 'static {
    fn proposal_timeout(&self, height: u64, round: u32) -> Duration;
    fn prevote_delay(&self, height: u64, round: u32) -> Duration;
    fn precommit_delay(&self, height: u64, round: u32) -> Duration;
    fn commit_wait(&self, height: u64, round: u32) -> Duration;
}
