//! `Ed25519Blake3Scheme`: the default, non-aggregating [`ConsensusScheme`].

use consensus_core::scheme::{ConsensusScheme, Signature};
use consensus_core::validator::{Digest, PubKey};

use crate::classical::ed25519::{ed25519_keypair, ed25519_sign, ed25519_verify};
use crate::hashing::blake3::hash_blake3;

/// Signs with Ed25519, hashes with Blake3, and does not aggregate
/// signatures beyond the bitset merge [`consensus_core::scheme::FullProof`]
/// already provides.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Blake3Scheme;

impl Ed25519Blake3Scheme {
    pub fn new() -> Self {
        Self
    }

    /// Generate a fresh keypair, for test fixtures and standalone tools —
    /// the running core never calls this itself.
    pub fn generate_keypair() -> (PubKey, Vec<u8>) {
        let (pk, sk) = ed25519_keypair();
        (PubKey(pk), sk)
    }
}

impl ConsensusScheme for Ed25519Blake3Scheme {
    fn verify(&self, message: &[u8], signature: &Signature, key: &PubKey) -> bool {
        ed25519_verify(message, &signature.0, &key.0)
    }

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Signature {
        Signature(ed25519_sign(message, secret_key))
    }

    fn derive_pub_key(&self, secret_key: &[u8]) -> PubKey {
        let sk_bytes: [u8; 32] = secret_key.try_into().expect("ed25519 secret key is 32 bytes");
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&sk_bytes);
        PubKey(signing_key.verifying_key().as_bytes().to_vec())
    }

    fn hash_block(&self, canonical_bytes: &[u8]) -> Digest {
        Digest(hash_blake3(canonical_bytes))
    }

    fn hash_pubkeys<'a, I: IntoIterator<Item = &'a PubKey>>(&self, keys: I) -> Digest {
        let segments: Vec<Vec<u8>> = keys.into_iter().map(|k| k.0.clone()).collect();
        let refs: Vec<&[u8]> = segments.iter().map(|s| s.as_slice()).collect();
        Digest(crate::hashing::blake3::hash_blake3_multiple(&refs))
    }

    fn hash_vote_powers<I: IntoIterator<Item = u64>>(&self, powers: I) -> Digest {
        let bytes: Vec<u8> = powers.into_iter().flat_map(|p| p.to_be_bytes()).collect();
        Digest(hash_blake3(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip_through_the_trait() {
        let scheme = Ed25519Blake3Scheme::new();
        let (pub_key, secret_key) = Ed25519Blake3Scheme::generate_keypair();
        let message = b"propose header at height 10";

        let signature = scheme.sign(message, &secret_key);
        assert!(scheme.verify(message, &signature, &pub_key));
        assert_eq!(scheme.derive_pub_key(&secret_key), pub_key);
    }

    #[test]
    fn pubkey_hash_is_order_sensitive() {
        let scheme = Ed25519Blake3Scheme::new();
        let (a, _) = Ed25519Blake3Scheme::generate_keypair();
        let (b, _) = Ed25519Blake3Scheme::generate_keypair();

        let forward = scheme.hash_pubkeys([&a, &b]);
        let backward = scheme.hash_pubkeys([&b, &a]);
        assert_ne!(forward, backward);
    }
}
