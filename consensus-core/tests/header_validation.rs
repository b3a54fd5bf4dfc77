//! Proposed-header rejection paths: a mutated signature, a mutated hash,
//! an unrecognized proposer, and an under-signed backfill commit proof.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use consensus_core::error::ProposedHeaderOutcome;
use consensus_core::scheme::Signature;
use consensus_core::testutil::InMemoryStores;
use consensus_core::validator::Digest;
use consensus_core::vote::CommitProof;
use consensus_schemes::Ed25519Blake3Scheme;

#[tokio::test]
async fn mutated_signature_is_rejected() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let mut header = fixture.proposed_header(1, 0, Digest::ZERO, None, "block-1", 0);
    let mut bytes = header.signature.0.clone();
    bytes[0] ^= 0xFF;
    header.signature = Signature(bytes);

    assert_eq!(mirror.handle_proposed_header(header).await, ProposedHeaderOutcome::BadSignature);
}

#[tokio::test]
async fn mutated_hash_is_rejected() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let header = fixture.proposed_header(1, 0, Digest::ZERO, None, "block-1", 0);
    let mut tampered_inner = (*header.header).clone();
    tampered_inner.hash = Digest([7u8; 32]);
    let tampered = consensus_core::header::ProposedHeader {
        header: Arc::new(tampered_inner),
        ..header
    };

    assert_eq!(mirror.handle_proposed_header(tampered).await, ProposedHeaderOutcome::BadBlockHash);
}

#[tokio::test]
async fn unrecognized_proposer_is_rejected() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    let scheme = Ed25519Blake3Scheme::new();
    let header = fixture.proposed_header(1, 0, Digest::ZERO, None, "block-1", 0);
    let (outsider_pub_key, outsider_secret) = Ed25519Blake3Scheme::generate_keypair();
    let mut forged = consensus_core::header::ProposedHeader {
        proposer_pub_key: outsider_pub_key,
        ..header
    };
    forged.signature = scheme.sign(&forged.sign_bytes(), &outsider_secret);

    assert_eq!(mirror.handle_proposed_header(forged).await, ProposedHeaderOutcome::SignerUnrecognized);
}

#[tokio::test]
async fn under_signed_backfill_proof_is_rejected() {
    let fixture = support::fixture(4);
    let stores = InMemoryStores::new();
    let (mirror, _gossip, _cancel) = fixture.spawn_mirror(1, &stores);

    // Only 1 of 4 validators signed off on height 1 — well short of the
    // Byzantine majority of 3 needed to back a height-2 proposal.
    let block_hash = Digest([1u8; 32]);
    let sparse = fixture.sparse_vote(
        consensus_core::vote::VoteTarget { height: 1, round: 0, block_hash: Some(block_hash) },
        consensus_core::vote::VoteKind::Precommit,
        &[0],
    );
    let mut proofs = HashMap::new();
    proofs.insert(Some(block_hash), sparse);
    let commit_proof = CommitProof { round: 0, pub_key_hash: fixture.validator_set.pub_key_hash(), proofs };

    let header2 = fixture.proposed_header(2, 0, block_hash, Some(commit_proof), "block-2", 1);

    assert_eq!(
        mirror.handle_proposed_header(header2).await,
        ProposedHeaderOutcome::BadPrevCommitVoteCount
    );
}
