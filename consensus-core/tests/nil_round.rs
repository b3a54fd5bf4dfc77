//! A round where Byzantine-majority precommit power lands on nil: no
//! block commits, the voting round advances instead.

mod support;

use consensus_core::error::{ProposedHeaderOutcome, VoteProofOutcome};
use consensus_core::messages::RoundEntranceResponse;
use consensus_core::store::CommittedHeaderStore;
use consensus_core::testutil::InMemoryStores;
use consensus_core::validator::Digest;
use consensus_core::vote::{VoteKind, VoteTarget};

#[tokio::test]
async fn nil_precommit_majority_advances_the_round_without_committing() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let header = fixture.proposed_header(1, 0, Digest::ZERO, None, "block-1", 0);
    assert_eq!(mirror.handle_proposed_header(header).await, ProposedHeaderOutcome::Accepted);

    let nil_prevote = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: None },
        VoteKind::Prevote,
        &[0, 1, 2],
    );
    assert_eq!(
        mirror.handle_prevote_proofs(1, 0, vec![(Digest::ZERO, nil_prevote)]).await,
        VoteProofOutcome::Accepted
    );

    let nil_precommit = fixture.sparse_vote(
        VoteTarget { height: 1, round: 0, block_hash: None },
        VoteKind::Precommit,
        &[0, 1, 2],
    );
    assert_eq!(
        mirror.handle_precommit_proofs(1, 0, vec![(Digest::ZERO, nil_precommit)]).await,
        VoteProofOutcome::Accepted
    );

    // No block reached majority, so the round advanced: the old
    // NextRound (round 1) is now Voting.
    let (_actions_tx, _height_committed_rx, response, _update_rx) =
        mirror.enter_round(1, 1, None).await;
    match response {
        RoundEntranceResponse::Join(smrv) => {
            assert_eq!(smrv.vrv.view.height, 1);
            assert_eq!(smrv.vrv.view.round, 1);
        }
        RoundEntranceResponse::Replay { .. } => panic!("height 1 never committed, replay is wrong here"),
    }

    let stored = stores.committed_headers.committed_header(1).await.unwrap();
    assert!(stored.is_none());
}
