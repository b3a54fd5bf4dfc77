//! Validators, validator sets, and the Byzantine-majority threshold.
//!
//! Grounded on `validators/validator_manager.rs` in the teacher crate for
//! the ordered-set-plus-lookup-index shape, adapted to the spec's simpler
//! `{pub_key, power}` record (no stake/storage/reputation fields — those
//! belong to the application, not the consensus core).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::scheme::ConsensusScheme;

/// Opaque public key bytes. The consensus core never interprets these; a
/// `ConsensusScheme` does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKey(pub Vec<u8>);

impl std::fmt::Display for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A 32-byte digest used for block hashes, pub-key-set hashes, and
/// power-set hashes alike. `Digest::ZERO` additionally serves as the
/// reserved key for a nil vote inside a round's prevote/precommit maps —
/// no real block ever hashes to it in practice, and [`crate::view::RoundView`]
/// treats it specially (never a committed block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A single validator's identity and vote weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: PubKey,
    /// Positive integer vote weight.
    pub power: u64,
}

/// An ordered, immutable sequence of validators. Order matters: key IDs in
/// sparse signature proofs are positional indices into this sequence.
///
/// Equality is by the derived `pub_key_hash`/`power_hash`, not by deep
/// structural comparison — two sets built differently but hashing the same
/// are the same set, per spec §3.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    index_by_key: HashMap<PubKey, usize>,
    total_power: u64,
    pub_key_hash: Digest,
    power_hash: Digest,
}

impl ValidatorSet {
    pub fn new<S: ConsensusScheme>(validators: Vec<Validator>, scheme: &S) -> Self {
        let index_by_key = validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.pub_key.clone(), i))
            .collect();
        let total_power = validators.iter().map(|v| v.power).sum();
        let pub_key_hash = scheme.hash_pubkeys(validators.iter().map(|v| &v.pub_key));
        let power_hash = scheme.hash_vote_powers(validators.iter().map(|v| v.power));
        Self {
            validators,
            index_by_key,
            total_power,
            pub_key_hash,
            power_hash,
        }
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    pub fn pub_key_hash(&self) -> Digest {
        self.pub_key_hash
    }

    pub fn power_hash(&self) -> Digest {
        self.power_hash
    }

    pub fn index_of(&self, pub_key: &PubKey) -> Option<usize> {
        self.index_by_key.get(pub_key).copied()
    }

    pub fn validator_at(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn power_of(&self, pub_key: &PubKey) -> Option<u64> {
        self.index_of(pub_key).map(|i| self.validators[i].power)
    }
}

impl PartialEq for ValidatorSet {
    fn eq(&self, other: &Self) -> bool {
        self.pub_key_hash == other.pub_key_hash && self.power_hash == other.power_hash
    }
}
impl Eq for ValidatorSet {}

/// `floor(2p/3) + 1`, the minimum power required for Byzantine agreement
/// on a set with total power `p`. Defined once and reused everywhere a
/// threshold is computed.
pub fn byzantine_majority(total_power: u64) -> u64 {
    (2 * total_power) / 3 + 1
}

pub fn has_byzantine_majority(power: u64, total_power: u64) -> bool {
    total_power > 0 && power >= byzantine_majority(total_power)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byzantine_majority_boundary() {
        // p = 9 -> floor(6)+1 = 7
        assert_eq!(byzantine_majority(9), 7);
        assert!(!has_byzantine_majority(6, 9));
        assert!(has_byzantine_majority(7, 9));
    }

    #[test]
    fn byzantine_majority_single_validator() {
        assert_eq!(byzantine_majority(1), 1);
        assert!(has_byzantine_majority(1, 1));
    }
}
