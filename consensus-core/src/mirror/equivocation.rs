//! Passive double-sign bookkeeping (spec §1: "detected but not punished").
//!
//! Grounded in spirit on the teacher's `byzantine::fault_detector` module:
//! a read-only detector with no enforcement action, kept narrow to what
//! the Mirror can observe locally (two distinct non-nil precommits from
//! the same validator at the same height/round).

use std::collections::{HashMap, HashSet};

use crate::validator::{Digest, PubKey};

#[derive(Debug, Clone)]
pub struct EquivocationReport {
    pub height: u64,
    pub round: u32,
    pub pub_key: PubKey,
    pub block_hashes: Vec<Digest>,
}

#[derive(Default)]
pub struct EquivocationTracker {
    seen: HashMap<(u64, u32, PubKey), HashSet<Digest>>,
    reported: HashSet<(u64, u32, PubKey)>,
    reports: Vec<EquivocationReport>,
}

impl EquivocationTracker {
    /// Record a precommit from `pub_key` for `block_hash` at (height,
    /// round). Returns `true` the moment a second, distinct block hash is
    /// observed for the same signer/slot. A given (height, round, signer)
    /// is only ever reported once, even if it's re-scanned after later
    /// votes land in the same round.
    pub fn observe_precommit(
        &mut self,
        height: u64,
        round: u32,
        pub_key: &PubKey,
        block_hash: Digest,
    ) -> bool {
        let key = (height, round, pub_key.clone());
        let hashes = self.seen.entry(key.clone()).or_default();
        hashes.insert(block_hash);
        if hashes.len() > 1 && self.reported.insert(key) {
            self.reports.push(EquivocationReport {
                height,
                round,
                pub_key: pub_key.clone(),
                block_hashes: hashes.iter().copied().collect(),
            });
            true
        } else {
            false
        }
    }

    pub fn reports(&self) -> &[EquivocationReport] {
        &self.reports
    }
}
