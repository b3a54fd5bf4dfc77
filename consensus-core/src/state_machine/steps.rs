//! The seven steps a local validator passes through inside one (H, R)
//! (spec §4.2 "Steps").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AwaitingProposal,
    Prevoting,
    AwaitingPrevotes,
    Precommitting,
    AwaitingPrecommits,
    CommitWait,
    AwaitingFinalization,
}
