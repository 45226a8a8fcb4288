use std::collections::HashMap;

use crate::event::{EventIndex, EventKind, EventRef, RoutineId, TraceElement};

/// Global counters accumulated while ingesting a trace, independent of any single routine.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TraceCounters {
    pub close_count: u64,
    /// Largest observed queue length per channel object id.
    pub max_buffer_observed: HashMap<u64, u32>,
    pub select_cases_with_partner: u64,
    pub runtime_duration: u64,
    pub timeout: bool,
}

impl TraceCounters {
    pub fn observe_channel_op(&mut self, object_id: u64, queue_len: u32, is_close: bool) {
        if is_close {
            self.close_count += 1;
        }
        let entry = self.max_buffer_observed.entry(object_id).or_insert(0);
        *entry = (*entry).max(queue_len);
    }
}

/// Per-routine ordered event lists plus the global counters block (spec.md §4.2).
///
/// Events live in per-routine arenas indexed by `(routine, index)`, not behind pointers, so
/// that `rel1`/`rel2` survive `copy_deep` as plain data (see DESIGN.md, "arena + stable
/// index").
#[derive(Debug, Clone, Default)]
pub struct TraceContainer {
    routines: HashMap<RoutineId, Vec<TraceElement>>,
    pub counters: TraceCounters,
}

impl TraceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_routines(&self) -> usize {
        self.routines.len()
    }

    pub fn routine_ids(&self) -> Vec<RoutineId> {
        let mut ids: Vec<_> = self.routines.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn routine(&self, routine: RoutineId) -> &[TraceElement] {
        self.routines
            .get(&routine)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, r: EventRef) -> Option<&TraceElement> {
        self.routines.get(&r.routine)?.get(r.index)
    }

    pub fn get_mut(&mut self, r: EventRef) -> Option<&mut TraceElement> {
        self.routines.get_mut(&r.routine)?.get_mut(r.index)
    }

    pub fn all_events(&self) -> impl Iterator<Item = &TraceElement> {
        self.routine_ids()
            .into_iter()
            .flat_map(move |r| self.routines[&r].iter())
    }

    /// Append an event to `routine`'s event list, assigning it the next per-routine index.
    pub fn append(&mut self, routine: RoutineId, mut event: TraceElement) -> EventRef {
        let list = self.routines.entry(routine).or_default();
        event.routine = routine;
        event.index = list.len();
        list.push(event);
        EventRef::new(routine, list.len() - 1)
    }

    /// Re-sort only the named routines by `tsort_key` (spec.md §4.2). Re-indexes events
    /// after sorting so `(routine, index)` references stay internally consistent; callers
    /// that hold stale `EventRef`s from before a sort must re-resolve them.
    pub fn sort_routines(&mut self, subset: &[RoutineId]) {
        for routine in subset {
            if let Some(list) = self.routines.get_mut(routine) {
                list.sort_by_key(TraceElement::tsort_key);
                for (i, e) in list.iter_mut().enumerate() {
                    e.index = i;
                }
            }
        }
    }

    /// Force the `t_pre`/`t_post` of the event at `(routine, index)` to `value`, without
    /// re-sorting. Used to stage an event before a `sort_routines` call.
    pub fn set_tsort_at(&mut self, routine: RoutineId, index: EventIndex, value: u64) {
        if let Some(event) = self
            .routines
            .get_mut(&routine)
            .and_then(|l| l.get_mut(index))
        {
            event.t_pre = value;
            if event.t_post != 0 {
                event.t_post = value;
            }
        }
    }

    /// Truncate every routine, keeping only events that are still incomplete (`t_post == 0`)
    /// or whose `t_post < tbound` (spec.md §4.6 step 2: "truncate the trace to `tPost < minT`").
    pub fn remove_later(&mut self, tbound: u64) {
        for list in self.routines.values_mut() {
            list.retain(|e| e.t_post == 0 || e.t_post < tbound);
            for (i, e) in list.iter_mut().enumerate() {
                e.index = i;
            }
        }
    }

    /// Inject a replay-control marker event at time `t` on `routine`.
    pub fn add_replay_control(&mut self, routine: RoutineId, t: u64, code: &str) -> EventRef {
        let event = TraceElement::new(
            routine,
            0,
            t,
            t,
            crate::event::SourcePosition::synthetic(routine, 0),
            0,
            EventKind::ReplayControl {
                code: code.to_string(),
            },
        );
        self.append(routine, event)
    }

    /// Inject a generic replay marker (partial-replay round boundary) at time `t`.
    pub fn add_replay(&mut self, routine: RoutineId, t: u64, round: u32) -> EventRef {
        self.add_replay_control(routine, t, &format!("round:{round}"))
    }

    /// Clone the whole container, events (including vector clocks) included.
    pub fn copy_deep(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourcePosition;

    fn atomic(t_pre: u64, t_post: u64) -> TraceElement {
        TraceElement::new(0, 0, t_pre, t_post, SourcePosition::parse("a.go:1"), 0, EventKind::Atomic)
    }

    #[test]
    fn append_assigns_monotonic_index() {
        let mut c = TraceContainer::new();
        let r0 = c.append(1, atomic(1, 2));
        let r1 = c.append(1, atomic(2, 3));
        assert_eq!(r0.index, 0);
        assert_eq!(r1.index, 1);
        assert_eq!(c.routine(1).len(), 2);
    }

    #[test]
    fn sort_routines_tails_incomplete_events() {
        let mut c = TraceContainer::new();
        c.append(1, atomic(5, 6));
        c.append(1, atomic(1, 0)); // never completed -> should sort last
        c.append(1, atomic(3, 4));

        c.sort_routines(&[1]);
        let sorted: Vec<_> = c.routine(1).iter().map(|e| e.t_pre).collect();
        assert_eq!(sorted, vec![3, 5, 1]);
        assert!(c.routine(1)[2].t_post == 0);
    }

    #[test]
    fn remove_later_truncates_by_time() {
        let mut c = TraceContainer::new();
        c.append(1, atomic(1, 2));
        c.append(1, atomic(5, 6));
        c.append(1, atomic(10, 11));

        c.remove_later(5);
        assert_eq!(c.routine(1).len(), 1);
        assert_eq!(c.routine(1)[0].t_pre, 1);
    }

    #[test]
    fn copy_deep_is_independent() {
        let mut c = TraceContainer::new();
        c.append(1, atomic(1, 2));
        let mut copy = c.copy_deep();
        copy.append(1, atomic(3, 4));
        assert_eq!(c.routine(1).len(), 1);
        assert_eq!(copy.routine(1).len(), 2);
    }
}
