//! A vote proof for a round far beyond NextRound can't be folded into the
//! kernel's in-memory views yet, but it can still be signature-checked and
//! persisted against whatever validator set is already on record for its
//! claimed pub-key hash (spec §4.1 "AddFutureVotes").

mod support;

use consensus_core::error::VoteProofOutcome;
use consensus_core::store::RoundStore;
use consensus_core::testutil::InMemoryStores;
use consensus_core::validator::Digest;
use consensus_core::vote::{VoteKind, VoteTarget};

#[tokio::test]
async fn vote_for_a_far_future_round_with_known_validators_is_verified() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let block_hash = Digest([3u8; 32]);
    let sparse = fixture.sparse_vote(
        VoteTarget { height: 1, round: 5, block_hash: Some(block_hash) },
        VoteKind::Prevote,
        &[0],
    );

    assert_eq!(
        mirror.handle_prevote_proofs(1, 5, vec![(block_hash, sparse)]).await,
        VoteProofOutcome::FutureVerified
    );

    let persisted = stores.rounds.sparse_prevotes(1, 5).await.unwrap();
    assert_eq!(persisted.len(), 1);
}

#[tokio::test]
async fn vote_for_a_far_future_round_with_unknown_validators_is_unverified() {
    let fixture = support::fixture(4);
    let other = support::fixture(3);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let block_hash = Digest([3u8; 32]);
    let sparse = other.sparse_vote(
        VoteTarget { height: 1, round: 5, block_hash: Some(block_hash) },
        VoteKind::Prevote,
        &[0],
    );

    assert_eq!(
        mirror.handle_prevote_proofs(1, 5, vec![(block_hash, sparse)]).await,
        VoteProofOutcome::FutureUnverified
    );
}

#[tokio::test]
async fn vote_for_a_past_orphaned_round_is_too_old() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    // Advance voting to round 1 via a nil precommit majority, then vote
    // for the now-orphaned round 0.
    let nil_prevote = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: None },
        VoteKind::Prevote,
        &[0, 1, 2],
    );
    mirror.handle_prevote_proofs(1, 0, vec![(Digest::ZERO, nil_prevote)]).await;
    let nil_precommit = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: None },
        VoteKind::Precommit,
        &[0, 1, 2],
    );
    mirror.handle_precommit_proofs(1, 0, vec![(Digest::ZERO, nil_precommit)]).await;

    let block_hash = Digest([4u8; 32]);
    let sparse = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: Some(block_hash) },
        VoteKind::Prevote,
        &[3],
    );
    assert_eq!(
        mirror.handle_prevote_proofs(1, 0, vec![(block_hash, sparse)]).await,
        VoteProofOutcome::RoundTooOld
    );
}
