//! Ambient configuration: timer durations for the default
//! [`crate::strategy::TimeoutStrategy`]. Validator sets, genesis, and keys
//! are data, not config, and live in `store`/`validator` instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::TimeoutStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusCoreConfig {
    pub proposal_timeout_ms: u64,
    pub prevote_delay_ms: u64,
    pub precommit_delay_ms: u64,
    pub commit_wait_ms: u64,
    /// Extra milliseconds added per round past round 0, modeling the
    /// standard Tendermint-family practice of backing off as a height
    /// struggles to finalize (grounded in the round-dependent timeout
    /// handling seen in `other_examples`' malachite/emerald `state.rs`).
    pub per_round_backoff_ms: u64,
}

impl Default for ConsensusCoreConfig {
    fn default() -> Self {
        Self {
            proposal_timeout_ms: 3_000,
            prevote_delay_ms: 1_000,
            precommit_delay_ms: 1_000,
            commit_wait_ms: 1_000,
            per_round_backoff_ms: 500,
        }
    }
}

impl ConsensusCoreConfig {
    fn with_backoff(&self, base_ms: u64, round: u32) -> Duration {
        Duration::from_millis(base_ms + self.per_round_backoff_ms * round as u64)
    }
}

impl TimeoutStrategy for ConsensusCoreConfig {
    fn proposal_timeout(&self, _height: u64, round: u32) -> Duration {
        self.with_backoff(self.proposal_timeout_ms, round)
    }

    fn prevote_delay(&self, _height: u64, round: u32) -> Duration {
        self.with_backoff(self.prevote_delay_ms, round)
    }

    fn precommit_delay(&self, _height: u64, round: u32) -> Duration {
        self.with_backoff(self.precommit_delay_ms, round)
    }

    fn commit_wait(&self, _height: u64, _round: u32) -> Duration {
        Duration::from_millis(self.commit_wait_ms)
    }
}
