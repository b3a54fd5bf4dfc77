//! Error and rejection types for the consensus core.
//!
//! Spec §7 distinguishes *message rejections* (expected control flow,
//! returned as plain enums to the caller) from *store errors* and other
//! failures (bubbled as `thiserror`-derived errors). We keep that split
//! here instead of folding everything into one `Error` type.

use crate::view::ViewLookupError;

/// Outcome of [`crate::mirror::Mirror::handle_proposed_header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposedHeaderOutcome {
    Accepted,
    AlreadyStored,
    SignerUnrecognized,
    BadBlockHash,
    BadSignature,
    MissingProposerPubKey,
    BadPrevCommitProofPubKeyHash,
    BadPrevCommitProofSignature,
    BadPrevCommitProofDoubleSigned,
    BadPrevCommitVoteCount,
    RoundTooOld,
    RoundTooFarInFuture,
    /// A store call failed while applying an otherwise-accepted header
    /// (spec §7 "store errors bubble to caller as InternalError").
    InternalError,
}

/// Outcome of [`crate::mirror::Mirror::handle_prevote_proofs`] /
/// `handle_precommit_proofs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteProofOutcome {
    Accepted,
    Empty,
    BadPubKeyHash,
    BadSignature,
    NoNewSignatures,
    RoundTooOld,
    FutureVerified,
    FutureUnverified,
    /// Version CAS mismatch; caller should re-snapshot and retry.
    Conflict,
    /// A store call failed on the future-vote persistence path (spec §7).
    InternalError,
}

/// Bubbled store-backed failures. Never returned for a rejected message —
/// those are [`ProposedHeaderOutcome`] / [`VoteProofOutcome`] values.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("height {0} has no known round state")]
    HeightUnknown(u64),
    #[error("no pub key hash {0} in the validator store")]
    NoPubKeyHash(String),
    #[error("round {round} at height {height} is unknown to the store")]
    RoundUnknown { height: u64, round: u32 },
    #[error("store was read before it was initialized")]
    Uninitialized,
    #[error("underlying store backend failed: {0}")]
    Backend(String),
}

/// Internal-error wrapper returned from the kernel's public contract.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("view lookup failed: {0}")]
    ViewLookup(#[from] ViewLookupError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("consensus strategy failed: {0}")]
    Strategy(String),
    #[error("the mirror channel closed unexpectedly")]
    MirrorChannelClosed,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("signature does not verify against the claimed key")]
    BadSignature,
    #[error("key id {0} is not a member of the candidate key set")]
    UnknownKeyId(u32),
    #[error("signing key is not a member of the candidate key set")]
    UnknownSigner,
    #[error("pub key hash mismatch: expected {expected}, got {got}")]
    PubKeyHashMismatch { expected: String, got: String },
    #[error("duplicate signature for the same validator index")]
    DoubleSigned,
}
