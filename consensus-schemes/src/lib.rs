//! Default `ConsensusScheme`: Ed25519 signatures over Blake3-hashed
//! canonical encodings, with no signature aggregation beyond the bitset
//! merge `consensus_core::scheme::FullProof` already provides.

pub mod classical;
pub mod hashing;
mod scheme;

pub use scheme::Ed25519Blake3Scheme;
