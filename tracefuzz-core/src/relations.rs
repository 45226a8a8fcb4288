//! GoPie relations (Rel1/Rel2) and scheduling chains (spec.md §4.3).

use std::collections::HashMap;

use crate::event::EventRef;
use crate::trace::TraceContainer;

/// Counters produced while deriving Rel1/Rel2, used directly by the GoPie energy
/// calculation (spec.md §4.6 "Energy").
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationCounts {
    pub cpop1: u64,
    pub cpop2: u64,
}

/// A maximal run of events, adjacent in global execution order, no two adjacent events
/// sharing a routine (spec.md §3 "Scheduling chain").
pub type SchedulingChain = Vec<EventRef>;

/// Events ordered as they executed globally: `t_pre` ascending, routine id then index as a
/// deterministic tie-break. Never-completed events (`t_post == 0`) are excluded, matching
/// the invariant that they are excluded from chain endpoints.
pub fn global_order(trace: &TraceContainer) -> Vec<EventRef> {
    let mut all: Vec<EventRef> = trace
        .all_events()
        .filter(|e| e.is_completed())
        .map(|e| e.event_ref())
        .collect();

    all.sort_by_key(|r| {
        let e = trace.get(*r).expect("event_ref always resolves");
        (e.t_pre, r.routine, r.index)
    });

    all
}

/// Rule 1 (CPOP1): walking each routine's events in order, link consecutive chain-eligible
/// events via `rel1`.
pub fn compute_rel1(trace: &mut TraceContainer, hb_augmented: bool) -> u64 {
    let mut cpop1 = 0u64;

    for routine in trace.routine_ids() {
        let eligible_refs: Vec<EventRef> = trace
            .routine(routine)
            .iter()
            .filter(|e| e.is_chain_eligible(hb_augmented))
            .map(|e| e.event_ref())
            .collect();

        for pair in eligible_refs.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            trace.get_mut(prev).unwrap().rel1.after = Some(next);
            trace.get_mut(next).unwrap().rel1.before = Some(prev);
            cpop1 += 1;
        }
    }

    cpop1
}

/// Rule 2 (CPOP2): group chain-eligible events by primitive id, link every cross-routine
/// pair within a group into each other's `rel2`.
pub fn compute_rel2(trace: &mut TraceContainer, hb_augmented: bool) -> u64 {
    let mut groups: HashMap<u64, Vec<EventRef>> = HashMap::new();

    for e in trace.all_events() {
        if !e.is_chain_eligible(hb_augmented) {
            continue;
        }
        if let Some(primitive) = e.kind.primitive_group(e.object_id) {
            groups.entry(primitive).or_default().push(e.event_ref());
        }
    }

    let mut cpop2 = 0u64;
    for group in groups.values() {
        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                let (a, b) = (group[i], group[j]);
                if a.routine == b.routine {
                    continue;
                }
                trace.get_mut(a).unwrap().rel2.insert(b);
                trace.get_mut(b).unwrap().rel2.insert(a);
                cpop2 += 1;
            }
        }
    }

    cpop2
}

/// Rules 3 + 4, iterated to a fixed point. Terminates because `rel2` is bounded by the
/// (finite) eligible-event cross product and only ever grows.
pub fn close_rel2(trace: &mut TraceContainer) {
    loop {
        let mut additions: Vec<(EventRef, EventRef)> = Vec::new();

        for e in trace.all_events() {
            let c = e.event_ref();

            // Rule 3: c' in rel1(c), c'' in rel2(c') => c'' in rel2(c)
            for c_prime in [e.rel1.before, e.rel1.after].into_iter().flatten() {
                if let Some(c_prime_event) = trace.get(c_prime) {
                    for c_double_prime in c_prime_event.rel2.iter() {
                        if *c_double_prime != c && !e.rel2.contains(c_double_prime) {
                            additions.push((c, *c_double_prime));
                        }
                    }
                }
            }

            // Rule 4: c' in rel2(c), c'' in rel2(c') => c'' in rel2(c)
            for c_prime in e.rel2.iter() {
                if let Some(c_prime_event) = trace.get(*c_prime) {
                    for c_double_prime in c_prime_event.rel2.iter() {
                        if *c_double_prime != c && !e.rel2.contains(c_double_prime) {
                            additions.push((c, *c_double_prime));
                        }
                    }
                }
            }
        }

        if additions.is_empty() {
            break;
        }

        for (c, addition) in additions {
            trace.get_mut(c).unwrap().rel2.insert(addition);
            // Symmetry (spec.md §3 invariant): B in rel2(A) implies A in rel2(B).
            trace.get_mut(addition).unwrap().rel2.insert(c);
        }
    }
}

/// Compute Rel1/Rel2 over the whole trace (Rules 1-4) and return the CPOP1/CPOP2 counters.
pub fn compute_relations(trace: &mut TraceContainer, hb_augmented: bool) -> RelationCounts {
    let cpop1 = compute_rel1(trace, hb_augmented);
    let cpop2 = compute_rel2(trace, hb_augmented);
    close_rel2(trace);
    log::debug!("relations: cpop1={cpop1} cpop2={cpop2} hb_augmented={hb_augmented}");
    RelationCounts { cpop1, cpop2 }
}

/// Partition the trace's global execution order into scheduling chains (spec.md §4.3
/// "Chain construction"): maximal runs with no two adjacent events on the same routine.
pub fn build_chains(trace: &TraceContainer) -> Vec<SchedulingChain> {
    let order = global_order(trace);

    let mut chains = Vec::new();
    let mut current: SchedulingChain = Vec::new();
    let mut last_routine: Option<usize> = None;

    for event in order {
        match last_routine {
            Some(r) if r == event.routine => {
                chains.push(std::mem::take(&mut current));
                current.push(event);
            }
            _ => current.push(event),
        }
        last_routine = Some(event.routine);
    }

    if !current.is_empty() {
        chains.push(current);
    }

    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, SourcePosition, TraceElement};

    fn push(trace: &mut TraceContainer, routine: usize, t_pre: u64, object_id: u64, kind: EventKind) {
        trace.append(
            routine,
            TraceElement::new(routine, 0, t_pre, t_pre + 1, SourcePosition::parse("a.go:1"), object_id, kind),
        );
    }

    #[test]
    fn rel2_is_symmetric_after_closure() {
        let mut trace = TraceContainer::new();
        push(&mut trace, 1, 1, 42, EventKind::Mutex { op: crate::event::MutexOp::Lock, rw: crate::event::MutexRw::Write });
        push(&mut trace, 2, 2, 42, EventKind::Mutex { op: crate::event::MutexOp::Lock, rw: crate::event::MutexRw::Write });

        compute_relations(&mut trace, false);

        let a = trace.get(EventRef::new(1, 0)).unwrap();
        let b = trace.get(EventRef::new(2, 0)).unwrap();
        assert!(a.rel2.contains(&EventRef::new(2, 0)));
        assert!(b.rel2.contains(&EventRef::new(1, 0)));
    }

    #[test]
    fn chain_breaks_on_repeated_routine() {
        // r1:e1, r2:e2, r2:e3, r1:e4 (spec.md §8 scenario 4)
        let mut trace = TraceContainer::new();
        push(&mut trace, 1, 1, 1, EventKind::Atomic);
        push(&mut trace, 2, 2, 2, EventKind::Atomic);
        push(&mut trace, 2, 3, 3, EventKind::Atomic);
        push(&mut trace, 1, 4, 4, EventKind::Atomic);

        let chains = build_chains(&trace);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0], vec![EventRef::new(1, 0), EventRef::new(2, 0)]);
        assert_eq!(chains[1], vec![EventRef::new(2, 1), EventRef::new(1, 1)]);
    }

    #[test]
    fn chains_never_have_adjacent_same_routine() {
        let mut trace = TraceContainer::new();
        for i in 0..5 {
            push(&mut trace, (i % 3) as usize, i as u64, i as u64, EventKind::Atomic);
        }
        let chains = build_chains(&trace);
        for chain in &chains {
            for pair in chain.windows(2) {
                assert_ne!(pair[0].routine, pair[1].routine);
            }
        }
    }

    #[test]
    fn closure_reaches_fixed_point() {
        let mut trace = TraceContainer::new();
        push(&mut trace, 1, 1, 7, EventKind::Mutex { op: crate::event::MutexOp::Lock, rw: crate::event::MutexRw::Write });
        push(&mut trace, 2, 2, 7, EventKind::Mutex { op: crate::event::MutexOp::Lock, rw: crate::event::MutexRw::Write });
        push(&mut trace, 2, 3, 9, EventKind::Mutex { op: crate::event::MutexOp::Lock, rw: crate::event::MutexRw::Write });
        push(&mut trace, 3, 4, 9, EventKind::Mutex { op: crate::event::MutexOp::Lock, rw: crate::event::MutexRw::Write });

        compute_relations(&mut trace, false);

        // Re-running closure must not add anything new (fixed point).
        let before: Vec<_> = trace.all_events().map(|e| e.rel2.len()).collect();
        close_rel2(&mut trace);
        let after: Vec<_> = trace.all_events().map(|e| e.rel2.len()).collect();
        assert_eq!(before, after);
    }
}
