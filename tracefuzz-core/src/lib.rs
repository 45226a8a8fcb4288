//! Core data model for concurrency-trace fuzzing: events, vector clocks, GoPie relations
//! and scheduling chains, trace ingestion, and per-run state.

pub mod error;
pub mod event;
pub mod parse;
pub mod relations;
pub mod state;
pub mod trace;
pub mod vector_clock;

pub use error::IngestionError;
pub use event::{EventKind, EventRef, ObjectId, RoutineId, TraceElement};
pub use relations::{RelationCounts, SchedulingChain};
pub use state::RunStats;
pub use trace::TraceContainer;
pub use vector_clock::{HbOrdering, VectorClock};
