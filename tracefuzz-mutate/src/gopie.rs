//! GoPie scheduling-chain mutator: abridge/flip/substitute/augment, energy-bounded
//! termination, HB validity filter, and chain persistence (spec.md §4.6).

use std::collections::HashSet;

use rand::Rng;
use tracefuzz_core::event::EventRef;
use tracefuzz_core::relations::SchedulingChain;
use tracefuzz_core::trace::TraceContainer;
use tracefuzz_core::vector_clock::HbOrdering;

use crate::errors::MutationError;

/// Canonical identity of a chain for dedup within a single mutation pass
/// (spec.md §3 "Fingerprint", pie variant).
pub fn chain_fingerprint(trace: &TraceContainer, chain: &SchedulingChain) -> String {
    chain
        .iter()
        .map(|r| {
            trace
                .get(*r)
                .map(|e| format!("{}#{}", e.position, e.index))
                .unwrap_or_else(|| format!("?#{}", r.index))
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Two chains: head removed, tail removed. Empty when `|c| < 2`.
pub fn abridge(chain: &SchedulingChain) -> Vec<SchedulingChain> {
    if chain.len() < 2 {
        return Vec::new();
    }
    vec![chain[1..].to_vec(), chain[..chain.len() - 1].to_vec()]
}

/// `|c| - 1` chains, each swapping one adjacent pair. Empty when `|c| < 2`.
pub fn flip(chain: &SchedulingChain) -> Vec<SchedulingChain> {
    if chain.len() < 2 {
        return Vec::new();
    }
    (0..chain.len() - 1)
        .map(|i| {
            let mut swapped = chain.clone();
            swapped.swap(i, i + 1);
            swapped
        })
        .collect()
}

/// For each position, substitute in an `rel1` neighbor not already present in the chain.
/// Only applies when `|c| <= bound`.
pub fn substitute(
    trace: &TraceContainer,
    chain: &SchedulingChain,
    bound: usize,
) -> Result<Vec<SchedulingChain>, MutationError> {
    if chain.len() > bound {
        return Err(MutationError::ChainTooLong { len: chain.len(), bound });
    }

    let mut out = Vec::new();
    for (i, event_ref) in chain.iter().enumerate() {
        let Some(event) = trace.get(*event_ref) else {
            continue;
        };
        for neighbor in [event.rel1.before, event.rel1.after].into_iter().flatten() {
            if chain.contains(&neighbor) {
                continue;
            }
            let mut variant = chain.clone();
            variant[i] = neighbor;
            out.push(variant);
        }
    }
    Ok(out)
}

/// For each `rel2` partner of the chain's last element not already in the chain, append it.
/// Only applies when `|c| <= bound`.
pub fn augment(
    trace: &TraceContainer,
    chain: &SchedulingChain,
    bound: usize,
) -> Result<Vec<SchedulingChain>, MutationError> {
    if chain.len() > bound {
        return Err(MutationError::ChainTooLong { len: chain.len(), bound });
    }
    let Some(last) = chain.last() else {
        return Ok(Vec::new());
    };
    let Some(last_event) = trace.get(*last) else {
        return Ok(Vec::new());
    };

    Ok(last_event
        .rel2
        .iter()
        .filter(|r| !chain.contains(r))
        .map(|r| {
            let mut variant = chain.clone();
            variant.push(*r);
            variant
        })
        .collect())
}

/// Happens-before validity filter (spec.md §4.6): in HB mode, a chain is invalid if any
/// adjacent pair's vector clocks order strictly `After`.
pub fn is_valid_chain(trace: &TraceContainer, chain: &SchedulingChain, hb_augmented: bool) -> bool {
    if !hb_augmented {
        return true;
    }

    chain.windows(2).all(|pair| {
        let (Some(a), Some(b)) = (trace.get(pair[0]), trace.get(pair[1])) else {
            return true;
        };
        match (&a.vector_clock, &b.vector_clock) {
            (Some(vc_a), Some(vc_b)) => vc_a.happens_before(vc_b) != HbOrdering::After,
            _ => true,
        }
    })
}

/// Expand a seed chain into a fingerprint-deduplicated set of mutated chains
/// (spec.md §4.6 "Loop"). `energy` in `[0, 100]` biases how quickly the loop gives up:
/// each round it draws `uniform(0, 200)` and stops if the draw is below `energy`.
pub fn mutate_chain<R: Rng>(
    trace: &TraceContainer,
    seed: &SchedulingChain,
    energy: u32,
    bound: usize,
    mutatebound: usize,
    rng: &mut R,
) -> Vec<SchedulingChain> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(chain_fingerprint(trace, seed));

    let mut set: Vec<SchedulingChain> = vec![seed.clone()];
    let mut frontier: Vec<SchedulingChain> = vec![seed.clone()];

    loop {
        let mut next_frontier = Vec::new();

        for chain in &frontier {
            let mut candidates = abridge(chain);
            candidates.extend(flip(chain));
            match substitute(trace, chain, bound) {
                Ok(variants) => candidates.extend(variants),
                Err(err) => log::debug!("substitute skipped: {err}"),
            }
            match augment(trace, chain, bound) {
                Ok(variants) => candidates.extend(variants),
                Err(err) => log::debug!("augment skipped: {err}"),
            }

            for candidate in candidates {
                let fp = chain_fingerprint(trace, &candidate);
                if seen.insert(fp) {
                    set.push(candidate.clone());
                    next_frontier.push(candidate);
                }
            }
        }

        frontier = next_frontier;

        let draw_stops = rng.gen_range(0u32..200) < energy;
        if set.len() > mutatebound || draw_stops || frontier.is_empty() {
            break;
        }
    }

    set.retain(|c| c != seed);
    set
}

/// Build the mutated trace for an accepted chain mutation (spec.md §4.6 "Persistence",
/// steps 1-4). Step 5 (serializing to `fuzzingTrace_<n>` and enqueuing `PieChain`) is the
/// caller's job, since it needs filesystem access.
pub fn build_mutated_trace(trace: &TraceContainer, chain: &SchedulingChain) -> Option<TraceContainer> {
    let min_t_post = chain
        .iter()
        .filter_map(|r| trace.get(*r))
        .map(|e| e.t_post)
        .filter(|&t| t != 0)
        .min()?;

    let mut mutated = trace.copy_deep();
    mutated.remove_later(min_t_post);

    let control_routine = chain.first()?.routine;
    mutated.add_replay_control(control_routine, min_t_post, "partial");

    for (i, event_ref) in chain.iter().enumerate() {
        let mut event = trace.get(*event_ref)?.clone();
        let t = min_t_post + 2 * (i as u64 + 1);
        event.t_pre = t;
        event.t_post = t;
        mutated.append(event.routine, event);
    }

    Some(mutated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracefuzz_core::event::{EventKind, MutexOp, MutexRw, SourcePosition, TraceElement};

    fn mutex_event(routine: usize, t: u64, object_id: u64) -> TraceElement {
        TraceElement::new(
            routine,
            0,
            t,
            t + 1,
            SourcePosition::parse("a.go:1"),
            object_id,
            EventKind::Mutex {
                op: MutexOp::Lock,
                rw: MutexRw::Write,
            },
        )
    }

    #[test]
    fn abridge_on_two_element_chain_yields_two_singletons() {
        let chain = vec![EventRef::new(1, 0), EventRef::new(2, 0)];
        let result = abridge(&chain);
        assert_eq!(result, vec![vec![EventRef::new(2, 0)], vec![EventRef::new(1, 0)]]);
    }

    #[test]
    fn flip_on_two_element_chain_yields_one_swap() {
        let chain = vec![EventRef::new(1, 0), EventRef::new(2, 0)];
        let result = flip(&chain);
        assert_eq!(result, vec![vec![EventRef::new(2, 0), EventRef::new(1, 0)]]);
    }

    #[test]
    fn substitute_rejects_chains_over_bound() {
        let trace = TraceContainer::new();
        let chain: SchedulingChain = (0..5).map(|i| EventRef::new(i, 0)).collect();
        assert_eq!(
            substitute(&trace, &chain, 3).unwrap_err(),
            MutationError::ChainTooLong { len: 5, bound: 3 }
        );
        assert_eq!(
            augment(&trace, &chain, 3).unwrap_err(),
            MutationError::ChainTooLong { len: 5, bound: 3 }
        );
    }

    #[test]
    fn mutate_chain_terminates_within_mutatebound() {
        let mut trace = TraceContainer::new();
        let r1 = trace.append(1, mutex_event(1, 1, 42));
        let r2 = trace.append(2, mutex_event(2, 2, 42));
        trace.get_mut(r1).unwrap().rel2.insert(r2);
        trace.get_mut(r2).unwrap().rel2.insert(r1);

        let seed = vec![r1, r2];
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let result = mutate_chain(&trace, &seed, 100, 3, 128, &mut rng);
        assert!(result.len() <= 128);
    }

    #[test]
    fn build_mutated_trace_truncates_and_appends_at_expected_timestamps() {
        let mut trace = TraceContainer::new();
        let r1 = trace.append(1, mutex_event(1, 1, 42));
        let r2 = trace.append(2, mutex_event(2, 2, 43));
        trace.append(1, mutex_event(1, 100, 44));

        let chain = vec![r1, r2];
        let mutated = build_mutated_trace(&trace, &chain).unwrap();

        // min tPost across chain = 2 (second event's t_post).
        let appended: Vec<_> = mutated
            .all_events()
            .filter(|e| e.t_pre > 2)
            .map(|e| e.t_pre)
            .collect();
        assert!(appended.contains(&4)); // 2 + 2*1
        assert!(appended.contains(&6)); // 2 + 2*2
    }
}
