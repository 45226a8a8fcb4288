//! GFuzz select mutator: random case flipping with a calibrated flip probability
//! (spec.md §4.4).

use rand::Rng;
use tracefuzz_core::state::RunStats;
use tracefuzz_core::trace::TraceCounters;

/// Snapshot of one executed `select` statement, as recorded in the trace.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SelectRecord {
    /// Position string identifying this select statement, e.g. `"f.go:12"`.
    pub id: String,
    pub timestamp: u64,
    /// Chosen case index, or `-1` if the default case fired.
    pub chosen: i64,
    pub case_count: usize,
    pub contains_default: bool,
}

impl SelectRecord {
    fn can_flip(&self) -> bool {
        if self.contains_default {
            self.case_count >= 1
        } else {
            self.case_count > 1
        }
    }
}

/// Global flip probability, calibrated so that across `n_selects` independent selects the
/// probability at least one is flipped is >= 0.99, with a 10% floor per select
/// (spec.md §4.4).
pub fn flip_probability(n_selects: usize) -> f64 {
    if n_selects == 0 {
        return 0.0;
    }
    let calibrated = 1.0 - (1.0 - 0.99_f64).powf(1.0 / n_selects as f64);
    calibrated.max(0.10)
}

/// Produce a (possibly) flipped copy of `record`. Returns an unchanged copy when no flip is
/// possible, or (with probability `1 - flip_p`) when no flip is drawn.
///
/// Whether `-1` (the default case) is a legal flip target comes from `record.contains_default`
/// itself, never from an outside mode flag — a select with no default case must never have a
/// default fabricated for it (spec.md §4.4).
pub fn random_flip<R: Rng>(record: &SelectRecord, flip_p: f64, rng: &mut R) -> SelectRecord {
    if !record.can_flip() || rng.gen_bool(1.0 - flip_p) {
        return record.clone();
    }

    let mut candidates: Vec<i64> = (0..record.case_count as i64).collect();
    if record.contains_default {
        candidates.push(-1);
    }
    candidates.retain(|&c| c != record.chosen);

    if candidates.is_empty() {
        return record.clone();
    }

    let chosen = candidates[rng.gen_range(0..candidates.len())];
    SelectRecord {
        chosen,
        ..record.clone()
    }
}

/// GFuzz's running state: the highest score observed across all runs for this test, used as
/// the denominator of `number_mutations`. Exposed as observable state per the "Open question"
/// in spec.md §9 (saturation behavior should be visible to callers/tests).
#[derive(Debug, Clone, Default)]
pub struct GFuzzState {
    pub max_score_seen: f64,
}

impl GFuzzState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed this run's score in, updating `max_score_seen` if it is a new high.
    pub fn observe_score(&mut self, score: f64) {
        if score > self.max_score_seen {
            self.max_score_seen = score;
        }
    }
}

/// Score for the current run (spec.md §4.4): rewards saturated channel buffers, frequent
/// pairwise communication, and (in HB mode) selects that found a partner.
pub fn compute_score(counters: &TraceCounters, stats: &RunStats, hb_augmented: bool) -> f64 {
    let pair_term: f64 = stats
        .pair_communication_counts
        .values()
        .map(|&com| (com.max(1) as f64).log2())
        .sum();

    let channel_count = counters.max_buffer_observed.len() as f64;
    let close_count = counters.close_count as f64;
    let buffer_fullness: f64 = counters.max_buffer_observed.values().map(|&v| v as f64).sum();

    let mut score = pair_term + 10.0 * channel_count + 10.0 * close_count + 10.0 * buffer_fullness;

    if hb_augmented {
        score += 10.0 * counters.select_cases_with_partner as f64;
    }

    score
}

/// Number of select-mutation candidates to generate this run (spec.md §4.4):
/// `ceil(5 * score / max_score_seen)`, clamped to at least 1 when `max_score_seen == 0`.
pub fn number_mutations(score: f64, state: &GFuzzState) -> u32 {
    if state.max_score_seen == 0.0 {
        return 1;
    }
    ((5.0 * score / state.max_score_seen).ceil() as i64).max(1) as u32
}

/// `numberMutations() >= 1` for a non-zero score is exactly `isInteresting` for GFuzz mode
/// (spec.md §4.8).
pub fn is_interesting(selects: &[SelectRecord], score: f64, state: &GFuzzState) -> bool {
    !selects.is_empty() && number_mutations(score, state) >= 1 && score > 0.0
}

/// Generate up to `number_mutations()` candidate select-flip maps over the whole select set.
pub fn create_select_mutations<R: Rng>(
    selects: &[SelectRecord],
    score: f64,
    state: &mut GFuzzState,
    rng: &mut R,
) -> Vec<crate::mutation::MutationRecord> {
    state.observe_score(score);

    if selects.is_empty() {
        return Vec::new();
    }

    let flip_p = flip_probability(selects.len());
    let count = number_mutations(score, state);
    log::debug!("gfuzz: score={score:.1} max_seen={:.1} generating {count} mutations", state.max_score_seen);

    (0..count)
        .map(|_| {
            let flipped = selects
                .iter()
                .map(|s| random_flip(s, flip_p, rng))
                .collect();
            crate::mutation::MutationRecord::SelectFlip(flipped)
        })
        .collect()
}
