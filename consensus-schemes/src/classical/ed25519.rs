//! Ed25519 keygen, signing, and verification.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};

/// Generate a random Ed25519 keypair as `(public_key, secret_key)` bytes.
pub fn ed25519_keypair() -> (Vec<u8>, Vec<u8>) {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    ed25519_keypair_from_seed(&seed)
}

/// Derive an Ed25519 keypair from a 32-byte seed, for reproducible test
/// fixtures.
pub fn ed25519_keypair_from_seed(seed: &[u8; 32]) -> (Vec<u8>, Vec<u8>) {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();
    (verifying_key.as_bytes().to_vec(), signing_key.as_bytes().to_vec())
}

/// Sign `message` with a 32-byte Ed25519 secret key. Panics if `secret_key`
/// isn't 32 bytes; callers only ever pass key material produced by
/// [`ed25519_keypair`]/[`ed25519_keypair_from_seed`].
pub fn ed25519_sign(message: &[u8], secret_key: &[u8]) -> Vec<u8> {
    let sk_bytes: [u8; 32] = secret_key.try_into().expect("ed25519 secret key is 32 bytes");
    let signing_key = SigningKey::from_bytes(&sk_bytes);
    signing_key.sign(message).to_bytes().to_vec()
}

/// Verify an Ed25519 signature. Malformed key/signature lengths verify as
/// `false` rather than erroring — a bad key is just a failing signature.
pub fn ed25519_verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let sig = Ed25519Signature::from_bytes(&sig_bytes);

    let Ok(pk_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };

    verifying_key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let (pk, sk) = ed25519_keypair();
        let message = b"round view update";

        let signature = ed25519_sign(message, &sk);
        assert!(ed25519_verify(message, &signature, &pk));
        assert!(!ed25519_verify(b"a different message", &signature, &pk));
    }

    #[test]
    fn keypair_from_seed_is_deterministic() {
        let seed = [42u8; 32];
        let (pk1, sk1) = ed25519_keypair_from_seed(&seed);
        let (pk2, sk2) = ed25519_keypair_from_seed(&seed);
        assert_eq!(pk1, pk2);
        assert_eq!(sk1, sk2);
    }

    #[test]
    fn malformed_signature_rejects_instead_of_panicking() {
        let (pk, _) = ed25519_keypair();
        assert!(!ed25519_verify(b"msg", &[0u8; 3], &pk));
    }
}
