use crate::vector_clock::VectorClock;
use std::fmt;

/// 1-based identifier of a routine (goroutine-equivalent) in a trace.
pub type RoutineId = usize;
/// Position of an event within its routine's event list.
pub type EventIndex = usize;
/// Identity of the synchronization primitive (mutex, channel, ...) an event acts on.
pub type ObjectId = u64;

/// Stable reference to an event: `(routine, index)`. Used instead of a pointer so that
/// `rel1`/`rel2` survive `copy_deep` without pointer-fixup (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EventRef {
    pub routine: RoutineId,
    pub index: EventIndex,
}

impl EventRef {
    pub fn new(routine: RoutineId, index: EventIndex) -> Self {
        Self { routine, index }
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.routine, self.index)
    }
}

/// File:line source position. Synthesized when the wire format for a kind does not carry
/// one (see `EventKind::synthetic_position`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourcePosition {
    pub file: String,
    pub line: u32,
}

impl SourcePosition {
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((file, line)) => Self {
                file: file.to_string(),
                line: line.parse().unwrap_or(0),
            },
            None => Self {
                file: s.to_string(),
                line: 0,
            },
        }
    }

    pub fn synthetic(routine: RoutineId, index: EventIndex) -> Self {
        Self {
            file: format!("routine-{routine}"),
            line: index as u32,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Immediate same-routine predecessor/successor among chain-eligible events.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rel1 {
    pub before: Option<EventRef>,
    pub after: Option<EventRef>,
}

/// Unordered set of cross-routine events sharing a primitive (and its transitive closure
/// under Rules 3/4). Symmetric by construction (see `relations::close_rel2`).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rel2 {
    partners: Vec<EventRef>,
}

impl Rel2 {
    pub fn contains(&self, e: &EventRef) -> bool {
        self.partners.contains(e)
    }

    /// Insert `e`, returning `true` if it was newly added.
    pub fn insert(&mut self, e: EventRef) -> bool {
        if self.contains(&e) {
            false
        } else {
            self.partners.push(e);
            true
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRef> {
        self.partners.iter()
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChannelOp {
    Send,
    Recv,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MutexOp {
    Lock,
    Unlock,
    TryLock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MutexRw {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WaitGroupOp {
    Add,
    Done,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CondOp {
    Wait,
    Signal,
    Broadcast,
}

/// A single case arm of a `select` statement, as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SelectCase {
    pub object_id: ObjectId,
    pub op: ChannelOp,
}

/// The kind-specific payload of a [`TraceElement`]. The shared header (routine, indices,
/// clocks, rels) lives in [`TraceElement`] itself; operations that only care about
/// "is this chain-eligible" or "what primitive does it touch" dispatch on this tag.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    Atomic,
    Channel {
        op: ChannelOp,
        buffer_size: u32,
        queue_len: u32,
        pair_id: u64,
    },
    Mutex {
        op: MutexOp,
        rw: MutexRw,
    },
    Fork {
        spawned_routine: RoutineId,
    },
    RoutineEnd,
    Select {
        cases: Vec<SelectCase>,
        chosen: i64,
        contains_default: bool,
    },
    WaitGroup {
        op: WaitGroupOp,
        delta: i64,
    },
    Once {
        first: bool,
    },
    Cond {
        op: CondOp,
    },
    New {
        type_name: String,
    },
    ReplayControl {
        code: String,
    },
}

impl EventKind {
    /// The single-letter tag used in the consumed trace line format (spec.md §6).
    ///
    /// `ReplayControl` has no tag in the consumed grammar (it is never read from a
    /// program-under-test trace, only written by the mutation engine into its own
    /// mutated trace output); it uses `'P'` for that internal, produced-only format.
    pub fn tag(&self) -> char {
        match self {
            EventKind::Atomic => 'A',
            EventKind::Channel { .. } => 'C',
            EventKind::Mutex { .. } => 'M',
            EventKind::Fork { .. } => 'G',
            EventKind::RoutineEnd => 'E',
            EventKind::Select { .. } => 'S',
            EventKind::WaitGroup { .. } => 'W',
            EventKind::Once { .. } => 'O',
            EventKind::Cond { .. } => 'D',
            EventKind::New { .. } => 'N',
            EventKind::ReplayControl { .. } => 'P',
        }
    }

    /// Relevance filter for scheduling-chain / Rel1/Rel2 construction (spec.md §4.3).
    ///
    /// Outside HB mode, only Fork (start), Mutex, Channel and Select participate.
    /// In HB-augmented mode everything except `New`, `ReplayControl` and `RoutineEnd` does.
    pub fn is_chain_eligible(&self, hb_augmented: bool) -> bool {
        if hb_augmented {
            !matches!(
                self,
                EventKind::New { .. } | EventKind::ReplayControl { .. } | EventKind::RoutineEnd
            )
        } else {
            matches!(
                self,
                EventKind::Fork { .. }
                    | EventKind::Mutex { .. }
                    | EventKind::Channel { .. }
                    | EventKind::Select { .. }
            )
        }
    }

    /// Primitive id grouping key used by CPOP2 (Rule 2): events on the same primitive
    /// across routines. `None` for kinds with no shared-primitive identity (Fork, RoutineEnd).
    pub fn primitive_group(&self, object_id: ObjectId) -> Option<ObjectId> {
        match self {
            EventKind::Mutex { .. }
            | EventKind::Channel { .. }
            | EventKind::WaitGroup { .. }
            | EventKind::Once { .. }
            | EventKind::Cond { .. }
            | EventKind::Atomic => Some(object_id),
            EventKind::Select { .. } | EventKind::Fork { .. } | EventKind::RoutineEnd => None,
            EventKind::New { .. } | EventKind::ReplayControl { .. } => None,
        }
    }
}

/// A single recorded synchronization event.
///
/// Invariant: within a routine, events are totally ordered by `t_pre`, monotonically
/// non-decreasing. `t_post == 0` marks a never-completed operation: included in HB
/// computations but excluded from pair statistics and chain endpoints.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TraceElement {
    pub routine: RoutineId,
    pub index: EventIndex,
    pub t_pre: u64,
    pub t_post: u64,
    pub position: SourcePosition,
    pub object_id: ObjectId,
    pub kind: EventKind,
    pub vector_clock: Option<VectorClock>,
    pub weak_vector_clock: Option<VectorClock>,
    pub rel1: Rel1,
    pub rel2: Rel2,
}

impl TraceElement {
    pub fn new(
        routine: RoutineId,
        index: EventIndex,
        t_pre: u64,
        t_post: u64,
        position: SourcePosition,
        object_id: ObjectId,
        kind: EventKind,
    ) -> Self {
        Self {
            routine,
            index,
            t_pre,
            t_post,
            position,
            object_id,
            kind,
            vector_clock: None,
            weak_vector_clock: None,
            rel1: Rel1::default(),
            rel2: Rel2::default(),
        }
    }

    pub fn event_ref(&self) -> EventRef {
        EventRef::new(self.routine, self.index)
    }

    /// `tSort` key used by `TraceContainer::sort_routines`: `t_pre` unless the event never
    /// completed (`t_post == 0`), in which case it sorts to the tail of its routine.
    pub fn tsort_key(&self) -> u64 {
        if self.t_post == 0 {
            u64::MAX
        } else {
            self.t_pre
        }
    }

    pub fn is_chain_eligible(&self, hb_augmented: bool) -> bool {
        self.kind.is_chain_eligible(hb_augmented)
    }

    pub fn is_completed(&self) -> bool {
        self.t_post != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsort_key_tails_incomplete_events() {
        let mut e = TraceElement::new(
            1,
            0,
            10,
            0,
            SourcePosition::parse("a.go:1"),
            0,
            EventKind::Atomic,
        );
        assert_eq!(e.tsort_key(), u64::MAX);
        e.t_post = 11;
        assert_eq!(e.tsort_key(), 10);
    }

    #[test]
    fn chain_eligibility_matches_relevance_filter() {
        let fork = EventKind::Fork { spawned_routine: 2 };
        let new = EventKind::New {
            type_name: "Mutex".into(),
        };
        let end = EventKind::RoutineEnd;

        assert!(fork.is_chain_eligible(false));
        assert!(!new.is_chain_eligible(false));
        assert!(!end.is_chain_eligible(false));

        // HB mode: everything but New/ReplayControl/RoutineEnd.
        assert!(fork.is_chain_eligible(true));
        assert!(!new.is_chain_eligible(true));
        assert!(!end.is_chain_eligible(true));
        assert!(EventKind::Atomic.is_chain_eligible(true));
    }

    #[test]
    fn rel2_insert_is_idempotent() {
        let mut rel2 = Rel2::default();
        let a = EventRef::new(1, 0);
        assert!(rel2.insert(a));
        assert!(!rel2.insert(a));
        assert_eq!(rel2.len(), 1);
    }
}
