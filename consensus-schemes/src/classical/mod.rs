//! Classical (non-aggregating) signature primitives.

pub mod ed25519;
