//! Three-of-four commit at two successive heights, then a state machine
//! joining behind the Committing height catches up by replay instead of
//! live voting.

mod support;

use consensus_core::error::{ProposedHeaderOutcome, VoteProofOutcome};
use consensus_core::messages::RoundEntranceResponse;
use consensus_core::store::CommittedHeaderStore;
use consensus_core::testutil::InMemoryStores;
use consensus_core::validator::Digest;
use consensus_core::vote::{VoteKind, VoteTarget};

#[tokio::test]
async fn three_of_four_commits_two_heights_then_replays_the_first() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let header1 = fixture.proposed_header(1, 0, Digest::ZERO, None, "block-1", 0);
    let hash1 = header1.header.hash;
    assert_eq!(mirror.handle_proposed_header(header1).await, ProposedHeaderOutcome::Accepted);

    let prevote1 = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: Some(hash1) },
        VoteKind::Prevote,
        &[0, 1, 2],
    );
    assert_eq!(
        mirror.handle_prevote_proofs(1, 0, vec![(hash1, prevote1)]).await,
        VoteProofOutcome::Accepted
    );

    let precommit1 = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: Some(hash1) },
        VoteKind::Precommit,
        &[0, 1, 2],
    );
    assert_eq!(
        mirror.handle_precommit_proofs(1, 0, vec![(hash1, precommit1)]).await,
        VoteProofOutcome::Accepted
    );

    // height 1 committed: committing = 1, voting = 2.
    let header2 = fixture.proposed_header(2, 0, hash1, None, "block-2", 1);
    let hash2 = header2.header.hash;
    assert_eq!(mirror.handle_proposed_header(header2).await, ProposedHeaderOutcome::Accepted);

    let prevote2 = fixture.sparse_vote(
        VoteTarget { height: 2, round: 0, block_hash: Some(hash2) },
        VoteKind::Prevote,
        &[0, 1, 2],
    );
    assert_eq!(
        mirror.handle_prevote_proofs(2, 0, vec![(hash2, prevote2)]).await,
        VoteProofOutcome::Accepted
    );
    let precommit2 = fixture.sparse_vote(
        VoteTarget { height: 2, round: 0, block_hash: Some(hash2) },
        VoteKind::Precommit,
        &[0, 1, 2],
    );
    assert_eq!(
        mirror.handle_precommit_proofs(2, 0, vec![(hash2, precommit2)]).await,
        VoteProofOutcome::Accepted
    );

    // height 2 committed: committing = 2, voting = 3. A state machine
    // entering at height 1 is now behind Committing and gets a replay.
    let (_actions_tx, _height_committed_rx, response, _update_rx) =
        mirror.enter_round(1, 0, None).await;
    match response {
        RoundEntranceResponse::Replay { committed_header, commit_proof } => {
            assert_eq!(committed_header.height, 1);
            assert_eq!(committed_header.hash, hash1);
            assert_eq!(commit_proof.round, 0);
            assert!(commit_proof.block_proof(hash1).is_some());
        }
        RoundEntranceResponse::Join(_) => panic!("expected a replay response for a height behind committing"),
    }

    let stored = stores.committed_headers.committed_header(1).await.unwrap();
    assert_eq!(stored.map(|h| h.hash), Some(hash1));
}
