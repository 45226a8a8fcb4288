//! Mutation record, the unit the queue dedups, quotas and persists (spec.md §3, §4.7).

use std::path::PathBuf;

use crate::select::SelectRecord;

/// A flow-delay candidate, disambiguated by `counter` when the same source position fires
/// more than once in a run (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DelayCandidate {
    pub position: String,
    pub counter: u32,
}

/// A candidate schedule mutation, ready to be deduplicated, quota-checked and enqueued.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MutationRecord {
    /// One full `select-id -> chosen-case` map (spec.md §4.4).
    SelectFlip(Vec<SelectRecord>),
    /// One or more delay candidates bundled or emitted singly depending on `oneMutPerDelay`
    /// (spec.md §4.5).
    FlowDelay(Vec<DelayCandidate>),
    /// A GoPie chain mutation already persisted as a full trace directory (spec.md §4.6).
    PieChain(PathBuf),
}

/// Canonical identity of a mutation for dedup + quota accounting (spec.md §3 "Fingerprint").
pub fn fingerprint(record: &MutationRecord) -> String {
    match record {
        MutationRecord::SelectFlip(records) => {
            let mut sorted: Vec<&SelectRecord> = records.iter().collect();
            sorted.sort_by(|a, b| a.id.cmp(&b.id));
            sorted
                .into_iter()
                .map(|r| format!("{}-{}", r.id, r.chosen))
                .collect::<Vec<_>>()
                .join(",")
        }
        MutationRecord::FlowDelay(candidates) => {
            let mut sorted: Vec<&DelayCandidate> = candidates.iter().collect();
            sorted.sort_by(|a, b| (a.position.as_str(), a.counter).cmp(&(b.position.as_str(), b.counter)));
            sorted
                .into_iter()
                .map(|c| format!("{}:{}", c.position, c.counter))
                .collect::<Vec<_>>()
                .join(",")
        }
        MutationRecord::PieChain(path) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::SelectRecord;

    fn select(id: &str, chosen: i64) -> SelectRecord {
        SelectRecord {
            id: id.to_string(),
            timestamp: 0,
            chosen,
            case_count: 2,
            contains_default: false,
        }
    }

    #[test]
    fn fingerprint_is_order_independent_over_select_ids() {
        let a = MutationRecord::SelectFlip(vec![select("a.go:1", 0), select("b.go:2", 1)]);
        let b = MutationRecord::SelectFlip(vec![select("b.go:2", 1), select("a.go:1", 0)]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_chosen_case() {
        let a = MutationRecord::SelectFlip(vec![select("a.go:1", 0)]);
        let b = MutationRecord::SelectFlip(vec![select("a.go:1", 1)]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn flow_fingerprint_matches_spec_scenario() {
        let record = MutationRecord::FlowDelay(vec![DelayCandidate {
            position: "f.go:20".into(),
            counter: 3,
        }]);
        assert_eq!(fingerprint(&record), "f.go:20:3");
    }
}
