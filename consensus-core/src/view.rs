//! `RoundView`, `VoteSummary`, and `VersionedRoundView` (spec §3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::header::ProposedHeader;
use crate::scheme::FullProof;
use crate::validator::{byzantine_majority, Digest, ValidatorSet};
use crate::vote::CommitProof;

/// One of the Mirror's three canonical slots, or why a (height, round)
/// doesn't map to any of them (spec §4.1 "View lookup").
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewLookupError {
    #[error("round is orphaned: same height as Voting but an earlier round")]
    ViewOrphaned,
    #[error("height is prior to the Committing view")]
    ViewBeforeCommitting,
    #[error("height/round is beyond NextRound")]
    ViewFuture,
    #[error("no view matches this (height, round)")]
    ViewNotFound,
}

/// The Mirror's canonical in-memory record of one (height, round).
pub struct RoundView {
    pub height: u64,
    pub round: u32,
    pub validator_set: Arc<ValidatorSet>,
    pub prev_commit_proof: Option<CommitProof>,
    pub proposed_headers: Vec<ProposedHeader>,
    pub prevote_proofs: HashMap<Digest, FullProof>,
    pub precommit_proofs: HashMap<Digest, FullProof>,
    pub vote_summary: VoteSummary,
}

impl RoundView {
    pub fn new(
        height: u64,
        round: u32,
        validator_set: Arc<ValidatorSet>,
        prev_commit_proof: Option<CommitProof>,
    ) -> Self {
        let available_power = validator_set.total_power();
        Self {
            height,
            round,
            validator_set,
            prev_commit_proof,
            proposed_headers: Vec::new(),
            prevote_proofs: HashMap::new(),
            precommit_proofs: HashMap::new(),
            vote_summary: VoteSummary {
                available_power,
                total_prevote_power: 0,
                total_precommit_power: 0,
                prevote_block_power: HashMap::new(),
                precommit_block_power: HashMap::new(),
                most_voted_prevote_hash: None,
                most_voted_precommit_hash: None,
            },
        }
    }

    /// Recompute the cached [`VoteSummary`] from `prevote_proofs` /
    /// `precommit_proofs`. Called after any mutation to those maps so the
    /// summary is never allowed to drift from its source maps (spec §3
    /// invariant: "a single VoteSummary must be recomputable").
    pub fn recompute_vote_summary(&mut self) {
        let powers: Vec<u64> = self
            .validator_set
            .validators()
            .iter()
            .map(|v| v.power)
            .collect();

        let prevote_block_power: HashMap<Digest, u64> = self
            .prevote_proofs
            .iter()
            .map(|(hash, proof)| (*hash, proof.power(&powers)))
            .collect();
        let precommit_block_power: HashMap<Digest, u64> = self
            .precommit_proofs
            .iter()
            .map(|(hash, proof)| (*hash, proof.power(&powers)))
            .collect();

        self.vote_summary = VoteSummary {
            available_power: self.validator_set.total_power(),
            total_prevote_power: prevote_block_power.values().sum(),
            total_precommit_power: precommit_block_power.values().sum(),
            most_voted_prevote_hash: most_voted(&prevote_block_power),
            most_voted_precommit_hash: most_voted(&precommit_block_power),
            prevote_block_power,
            precommit_block_power,
        };
    }

    /// The single block, if any, whose precommit power has crossed
    /// Byzantine majority (spec §4.1 "Shift Voting -> Committing").
    /// `Digest::ZERO` is the reserved nil-vote key and never counts as a
    /// committed block.
    pub fn committed_block(&self) -> Option<Digest> {
        let threshold = byzantine_majority(self.vote_summary.available_power);
        self.vote_summary
            .precommit_block_power
            .iter()
            .filter(|(hash, _)| !hash.is_zero())
            .find(|(_, power)| **power >= threshold)
            .map(|(hash, _)| *hash)
    }

    /// Whether this round's nil precommits (keyed under `Digest::ZERO`)
    /// have alone crossed Byzantine majority.
    pub fn has_nil_precommit_majority(&self) -> bool {
        let threshold = byzantine_majority(self.vote_summary.available_power);
        self.vote_summary
            .precommit_block_power
            .get(&Digest::ZERO)
            .is_some_and(|power| *power >= threshold)
    }
}

fn most_voted(map: &HashMap<Digest, u64>) -> Option<Digest> {
    map.iter().max_by_key(|(_, power)| **power).map(|(h, _)| *h)
}

/// Redundant, derived cache over a [`RoundView`]'s vote maps.
#[derive(Debug, Clone, Default)]
pub struct VoteSummary {
    pub available_power: u64,
    pub total_prevote_power: u64,
    pub total_precommit_power: u64,
    pub prevote_block_power: HashMap<Digest, u64>,
    pub precommit_block_power: HashMap<Digest, u64>,
    pub most_voted_prevote_hash: Option<Digest>,
    pub most_voted_precommit_hash: Option<Digest>,
}

/// A [`RoundView`] wrapped with monotonically increasing version counters
/// (spec §3). The top-level version increases on any change; per-block
/// versions increase only when that block's proof changes.
pub struct VersionedRoundView {
    pub view: RoundView,
    pub version: u64,
    pub prevote_version: u64,
    pub precommit_version: u64,
    pub prevote_block_versions: HashMap<Digest, u64>,
    pub precommit_block_versions: HashMap<Digest, u64>,
}

impl VersionedRoundView {
    pub fn new(view: RoundView) -> Self {
        Self {
            view,
            version: 1,
            prevote_version: 1,
            precommit_version: 1,
            prevote_block_versions: HashMap::new(),
            precommit_block_versions: HashMap::new(),
        }
    }

    pub fn height(&self) -> u64 {
        self.view.height
    }

    pub fn round(&self) -> u32 {
        self.view.round
    }

    /// Bump the top-level version. Called by the Mirror any time the
    /// underlying view is mutated, regardless of which field changed.
    pub fn touch(&mut self) {
        self.version += 1;
    }

    /// Bump the prevote (or precommit) version, both overall and for the
    /// specific block whose proof changed.
    pub fn bump_prevote(&mut self, block_hash: Digest) {
        self.prevote_version += 1;
        *self.prevote_block_versions.entry(block_hash).or_insert(0) += 1;
        self.touch();
    }

    pub fn bump_precommit(&mut self, block_hash: Digest) {
        self.precommit_version += 1;
        *self.precommit_block_versions.entry(block_hash).or_insert(0) += 1;
        self.touch();
    }

    /// Make an independent, version-stamped copy to hand to an outbound
    /// channel. The Mirror never shares mutable references outward (spec
    /// §5 "Ordering").
    pub fn snapshot(&self) -> VersionedRoundView {
        self.clone_for_outbound()
    }

    fn clone_for_outbound(&self) -> VersionedRoundView {
        let view = RoundView {
            height: self.view.height,
            round: self.view.round,
            validator_set: self.view.validator_set.clone(),
            prev_commit_proof: self.view.prev_commit_proof.clone(),
            proposed_headers: self.view.proposed_headers.clone(),
            prevote_proofs: self.view.prevote_proofs.clone(),
            precommit_proofs: self.view.precommit_proofs.clone(),
            vote_summary: self.view.vote_summary.clone(),
        };
        VersionedRoundView {
            view,
            version: self.version,
            prevote_version: self.prevote_version,
            precommit_version: self.precommit_version,
            prevote_block_versions: self.prevote_block_versions.clone(),
            precommit_block_versions: self.precommit_block_versions.clone(),
        }
    }
}
