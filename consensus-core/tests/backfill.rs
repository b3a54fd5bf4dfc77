//! A header for `voting_height + 1` whose `prev_commit_proof` completes
//! the voting height's precommit majority triggers a real shift, then the
//! header itself is accepted.

mod support;

use std::collections::HashMap;

use consensus_core::error::ProposedHeaderOutcome;
use consensus_core::store::CommittedHeaderStore;
use consensus_core::testutil::InMemoryStores;
use consensus_core::validator::Digest;
use consensus_core::vote::{CommitProof, VoteKind, VoteTarget};

#[tokio::test]
async fn backfilled_commit_proof_shifts_voting_to_committing() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(2, &stores);

    // This mirror joined consensus at height 2 (e.g. it never saw height
    // 1 at all) and knows about height 2's proposal, but hasn't collected
    // any precommit votes for it yet.
    let header2 = fixture.proposed_header(2, 0, Digest([1u8; 32]), None, "block-2", 0);
    let hash2 = header2.header.hash;
    assert_eq!(mirror.handle_proposed_header(header2).await, ProposedHeaderOutcome::Accepted);

    let backfill_precommit = fixture.sparse_vote(
        VoteTarget { height: 2, round: 0, block_hash: Some(hash2) },
        VoteKind::Precommit,
        &[0, 1, 2],
    );
    let mut proofs = HashMap::new();
    proofs.insert(Some(hash2), backfill_precommit);
    let commit_proof_for_height2 =
        CommitProof { round: 0, pub_key_hash: fixture.validator_set.pub_key_hash(), proofs };

    let header3 = fixture.proposed_header(3, 0, hash2, Some(commit_proof_for_height2), "block-3", 1);
    assert_eq!(mirror.handle_proposed_header(header3).await, ProposedHeaderOutcome::Accepted);

    let stored = stores.committed_headers.committed_header(2).await.unwrap();
    assert_eq!(stored.map(|h| h.hash), Some(hash2));
}
