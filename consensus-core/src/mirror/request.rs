//! The request enum the [`super::Mirror`] handle sends to
//! [`super::kernel::MirrorKernel`]. All mutation of the three canonical
//! views happens inside the kernel task in response to these; everything
//! else (signature/hash verification, sparse-merge) happens in the
//! caller's own task, per spec §4.1's two-stage design.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{ProposedHeaderOutcome, VoteProofOutcome};
use crate::header::ProposedHeader;
use crate::messages::RoundEntrance;
use crate::scheme::FullProof;
use crate::validator::{Digest, PubKey, ValidatorSet};
use crate::vote::VoteKind;

use super::equivocation::EquivocationReport;

/// Result of the lightweight, in-kernel classification that precedes full
/// verification of an incoming [`ProposedHeader`] (spec §4.1 "Public
/// contract").
pub enum HeaderCheck {
    /// Proceed to full verification; the caller checks proposer membership
    /// itself against this validator set before sending `ApplyHeader`.
    Proceed {
        validator_set: Arc<ValidatorSet>,
    },
    Reject(ProposedHeaderOutcome),
    /// The header targets the height right after Committing and carries a
    /// commit proof that should be backfilled before re-checking.
    NeedsBackfill,
}

/// A read-only snapshot of one block's vote proof plus the version it was
/// read at, used as the CAS token for `ApplyVotes`.
pub struct VoteSnapshot {
    pub proofs: HashMap<Digest, FullProof>,
    pub prev_versions: HashMap<Digest, u64>,
    pub candidates: Vec<PubKey>,
    pub pub_key_hash: crate::validator::Digest,
}

pub enum VoteApplyOutcome {
    Applied(VoteProofOutcome),
    Conflict,
}

pub enum MirrorRequest {
    CheckHeader {
        height: u64,
        round: u32,
        reply: oneshot::Sender<HeaderCheck>,
    },
    ApplyHeader {
        header: ProposedHeader,
        reply: oneshot::Sender<ProposedHeaderOutcome>,
    },
    BackfillAndRecheck {
        header: ProposedHeader,
        reply: oneshot::Sender<ProposedHeaderOutcome>,
    },
    SnapshotVotes {
        height: u64,
        round: u32,
        kind: VoteKind,
        reply: oneshot::Sender<Result<VoteSnapshot, VoteProofOutcome>>,
    },
    ApplyVotes {
        height: u64,
        round: u32,
        kind: VoteKind,
        merged: HashMap<Digest, FullProof>,
        prev_versions: HashMap<Digest, u64>,
        reply: oneshot::Sender<VoteApplyOutcome>,
    },
    RoundEntrance(RoundEntrance),
    EquivocationReports {
        reply: oneshot::Sender<Vec<EquivocationReport>>,
    },
}
