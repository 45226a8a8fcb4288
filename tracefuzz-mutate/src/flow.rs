//! Flow mutator: identify delay candidates (once-ops, mutex-ops, sends, receives) and emit
//! delay mutations (spec.md §4.5).

use std::collections::HashSet;

use crate::mutation::{DelayCandidate, MutationRecord};

/// Process-wide "already delayed" set (spec.md §4.5, §5): every `(position, counter)` pair
/// that has been turned into a `FlowDelay` mutation in any previous run for this test.
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    already_delayed: HashSet<(String, u32)>,
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_delayed(&self, candidate: &DelayCandidate) -> bool {
        self.already_delayed
            .contains(&(candidate.position.clone(), candidate.counter))
    }

    fn mark_delayed(&mut self, candidate: &DelayCandidate) {
        self.already_delayed
            .insert((candidate.position.clone(), candidate.counter));
    }
}

/// Emit delay mutations for a freshly-observed batch of candidates, honoring
/// `maxFlowMut` and `oneMutPerDelay` (spec.md §4.5).
pub fn create_flow_mutations(
    candidates: &[DelayCandidate],
    state: &mut FlowState,
    one_mut_per_delay: bool,
    max_flow_mut: usize,
) -> Vec<MutationRecord> {
    let mut fresh = Vec::new();
    for candidate in candidates {
        if state.was_delayed(candidate) {
            continue;
        }
        state.mark_delayed(candidate);
        fresh.push(candidate.clone());
        if fresh.len() >= max_flow_mut {
            break;
        }
    }

    if fresh.is_empty() {
        return Vec::new();
    }
    log::debug!("flow: {} fresh delay candidates, one_mut_per_delay={one_mut_per_delay}", fresh.len());

    if one_mut_per_delay {
        fresh
            .into_iter()
            .map(|c| MutationRecord::FlowDelay(vec![c]))
            .collect()
    } else {
        vec![MutationRecord::FlowDelay(fresh)]
    }
}
