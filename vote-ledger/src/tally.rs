//! Per-candidate vote counting
//!
//! Counts exist in two forms that must always agree:
//! - maintained counters, persisted in the `tally` column family in the same
//!   write batch as the leaf they account for
//! - a recount, derived by scanning every ledger entry
//!
//! [`TallyEngine`] is the writer's in-memory copy of the maintained
//! counters. The writer stages increments on a clone and only swaps it in
//! after the batch is durable, so a failed write leaves the counters as
//! they were.

use crate::types::{Candidate, CandidateId, LedgerEntry, Tally};

/// Running per-candidate counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallyEngine {
    counts: Tally,
}

impl TallyEngine {
    /// Start from persisted counters
    pub fn from_counts(counts: Tally) -> Self {
        Self { counts }
    }

    /// Add one vote, returning the new count for the candidate
    pub fn increment(&mut self, candidate_id: CandidateId) -> u64 {
        let count = self.counts.entry(candidate_id).or_insert(0);
        *count += 1;
        *count
    }

    /// Count for one candidate
    pub fn get(&self, candidate_id: CandidateId) -> u64 {
        self.counts.get(&candidate_id).copied().unwrap_or(0)
    }

    /// All non-zero counters
    pub fn counts(&self) -> &Tally {
        &self.counts
    }

    /// Total votes counted
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Recount from ledger entries
pub fn recount<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Tally {
    let mut engine = TallyEngine::default();
    for entry in entries {
        engine.increment(entry.vote.candidate_id);
    }
    engine.counts
}

/// Counts for every catalog candidate, zero for those without votes
pub fn complete(candidates: &[Candidate], counters: &Tally) -> Tally {
    let mut counts: Tally = candidates.iter().map(|c| (c.id, 0)).collect();
    for (candidate_id, count) in counters {
        counts.insert(*candidate_id, *count);
    }
    counts
}

/// Candidates whose maintained count differs from the recount,
/// as `(candidate, maintained, recounted)`
pub fn drift(maintained: &Tally, recounted: &Tally) -> Vec<(CandidateId, u64, u64)> {
    let mut ids: Vec<CandidateId> = maintained.keys().chain(recounted.keys()).copied().collect();
    ids.sort();
    ids.dedup();

    ids.into_iter()
        .filter_map(|id| {
            let m = maintained.get(&id).copied().unwrap_or(0);
            let r = recounted.get(&id).copied().unwrap_or(0);
            (m != r).then_some((id, m, r))
        })
        .collect()
}
