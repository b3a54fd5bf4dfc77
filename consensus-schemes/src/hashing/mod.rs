//! Blake3 hashing.

pub mod blake3;

pub use blake3::{hash_blake3, hash_blake3_multiple};