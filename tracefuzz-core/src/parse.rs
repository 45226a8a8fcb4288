//! Trace line parsing (spec.md §6 "Trace event line format").
//!
//! Consumes comma-separated lines tagged `A,C,M,G,S,W,O,D,N,E` with the field counts named
//! in spec.md §6 (A=5, C=10, M=8, G=4, S=8, W=8, O=6, D=6, N=6, E=2). `ReplayControl`
//! markers are produced by this crate (not consumed from a program-under-test trace) and
//! therefore have no entry in this parser; see [`crate::event::EventKind::tag`].

use crate::error::IngestionError;
use crate::event::{
    ChannelOp, CondOp, EventKind, MutexOp, MutexRw, SelectCase, SourcePosition, TraceElement,
    WaitGroupOp,
};

fn field<'a>(fields: &[&'a str], i: usize, name: &'static str) -> Result<&'a str, IngestionError> {
    fields
        .get(i)
        .copied()
        .ok_or(IngestionError::MalformedField {
            field: name,
            value: String::new(),
        })
}

fn parse_u64(fields: &[&str], i: usize, name: &'static str) -> Result<u64, IngestionError> {
    field(fields, i, name)?
        .parse()
        .map_err(|_| IngestionError::MalformedField {
            field: name,
            value: fields[i].to_string(),
        })
}

fn parse_i64(fields: &[&str], i: usize, name: &'static str) -> Result<i64, IngestionError> {
    field(fields, i, name)?
        .parse()
        .map_err(|_| IngestionError::MalformedField {
            field: name,
            value: fields[i].to_string(),
        })
}

fn parse_usize(fields: &[&str], i: usize, name: &'static str) -> Result<usize, IngestionError> {
    field(fields, i, name)?
        .parse()
        .map_err(|_| IngestionError::MalformedField {
            field: name,
            value: fields[i].to_string(),
        })
}

fn parse_bool(fields: &[&str], i: usize, name: &'static str) -> Result<bool, IngestionError> {
    match field(fields, i, name)? {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(IngestionError::MalformedField {
            field: name,
            value: other.to_string(),
        }),
    }
}

/// Required field count (including the kind tag) for a given kind tag.
pub fn expected_field_count(kind: char) -> Option<usize> {
    match kind {
        'A' => Some(5),
        'C' => Some(10),
        'M' => Some(8),
        'G' => Some(4),
        'S' => Some(8),
        'W' => Some(8),
        'O' => Some(6),
        'D' => Some(6),
        'N' => Some(6),
        'E' => Some(2),
        _ => None,
    }
}

/// Parse a single `trace_<routine>.log` line into a [`TraceElement`].
///
/// The event's `routine`/`index` fields are set from the line's own routine field and a
/// placeholder index of 0; the caller (trace ingestion) overwrites `index` via
/// `TraceContainer::append`.
pub fn parse_line(line: &str) -> Result<TraceElement, IngestionError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(IngestionError::EmptyLine);
    }

    let fields: Vec<&str> = line.split(',').collect();
    let kind_tag = fields[0]
        .chars()
        .next()
        .ok_or(IngestionError::EmptyLine)?;

    let expected = expected_field_count(kind_tag).ok_or(IngestionError::UnknownKind(kind_tag))?;
    if fields.len() != expected {
        log::warn!(
            "trace line has wrong field count for kind {kind_tag}: expected {expected}, got {}",
            fields.len()
        );
        return Err(IngestionError::WrongFieldCount {
            kind: kind_tag,
            expected,
            got: fields.len(),
        });
    }

    match kind_tag {
        'A' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let position = SourcePosition::parse(field(&fields, 4, "position")?);
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                position,
                0,
                EventKind::Atomic,
            ))
        }
        'C' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let position = SourcePosition::parse(field(&fields, 4, "position")?);
            let object_id = parse_u64(&fields, 5, "object_id")?;
            let op = match field(&fields, 6, "op")? {
                "send" => ChannelOp::Send,
                "recv" => ChannelOp::Recv,
                "close" => ChannelOp::Close,
                other => {
                    return Err(IngestionError::MalformedField {
                        field: "op",
                        value: other.to_string(),
                    });
                }
            };
            let buffer_size = parse_u64(&fields, 7, "buffer_size")? as u32;
            let queue_len = parse_u64(&fields, 8, "queue_len")? as u32;
            let pair_id = parse_u64(&fields, 9, "pair_id")?;
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                position,
                object_id,
                EventKind::Channel {
                    op,
                    buffer_size,
                    queue_len,
                    pair_id,
                },
            ))
        }
        'M' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let position = SourcePosition::parse(field(&fields, 4, "position")?);
            let object_id = parse_u64(&fields, 5, "object_id")?;
            let op = match field(&fields, 6, "op")? {
                "lock" => MutexOp::Lock,
                "unlock" => MutexOp::Unlock,
                "trylock" => MutexOp::TryLock,
                other => {
                    return Err(IngestionError::MalformedField {
                        field: "op",
                        value: other.to_string(),
                    });
                }
            };
            let rw = match field(&fields, 7, "rw")? {
                "R" => MutexRw::Read,
                "W" => MutexRw::Write,
                other => {
                    return Err(IngestionError::MalformedField {
                        field: "rw",
                        value: other.to_string(),
                    });
                }
            };
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                position,
                object_id,
                EventKind::Mutex { op, rw },
            ))
        }
        'G' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let spawned_routine = parse_usize(&fields, 3, "spawned_routine")?;
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_pre,
                SourcePosition::synthetic(routine, 0),
                0,
                EventKind::Fork { spawned_routine },
            ))
        }
        'S' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let position = SourcePosition::parse(field(&fields, 4, "position")?);
            let chosen = parse_i64(&fields, 5, "chosen")?;
            let num_cases = parse_usize(&fields, 6, "num_cases")?;
            let contains_default = parse_bool(&fields, 7, "contains_default")?;
            let cases = (0..num_cases)
                .map(|i| SelectCase {
                    object_id: i as u64,
                    op: ChannelOp::Recv,
                })
                .collect();
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                position,
                0,
                EventKind::Select {
                    cases,
                    chosen,
                    contains_default,
                },
            ))
        }
        'W' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let position = SourcePosition::parse(field(&fields, 4, "position")?);
            let object_id = parse_u64(&fields, 5, "object_id")?;
            let op = match field(&fields, 6, "op")? {
                "add" => WaitGroupOp::Add,
                "done" => WaitGroupOp::Done,
                "wait" => WaitGroupOp::Wait,
                other => {
                    return Err(IngestionError::MalformedField {
                        field: "op",
                        value: other.to_string(),
                    });
                }
            };
            let delta = parse_i64(&fields, 7, "delta")?;
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                position,
                object_id,
                EventKind::WaitGroup { op, delta },
            ))
        }
        'O' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let object_id = parse_u64(&fields, 4, "object_id")?;
            let first = parse_bool(&fields, 5, "first")?;
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                SourcePosition::synthetic(routine, 0),
                object_id,
                EventKind::Once { first },
            ))
        }
        'D' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let object_id = parse_u64(&fields, 4, "object_id")?;
            let op = match field(&fields, 5, "op")? {
                "wait" => CondOp::Wait,
                "signal" => CondOp::Signal,
                "broadcast" => CondOp::Broadcast,
                other => {
                    return Err(IngestionError::MalformedField {
                        field: "op",
                        value: other.to_string(),
                    });
                }
            };
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                SourcePosition::synthetic(routine, 0),
                object_id,
                EventKind::Cond { op },
            ))
        }
        'N' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            let t_pre = parse_u64(&fields, 2, "t_pre")?;
            let t_post = parse_u64(&fields, 3, "t_post")?;
            let object_id = parse_u64(&fields, 4, "object_id")?;
            let type_name = field(&fields, 5, "type_name")?.to_string();
            Ok(TraceElement::new(
                routine,
                0,
                t_pre,
                t_post,
                SourcePosition::synthetic(routine, 0),
                object_id,
                EventKind::New { type_name },
            ))
        }
        'E' => {
            let routine = parse_usize(&fields, 1, "routine")?;
            Ok(TraceElement::new(
                routine,
                0,
                u64::MAX,
                u64::MAX,
                SourcePosition::synthetic(routine, 0),
                0,
                EventKind::RoutineEnd,
            ))
        }
        other => Err(IngestionError::UnknownKind(other)),
    }
}

/// Serialize a [`TraceElement`] back into the line format [`parse_line`] consumes. Used to
/// persist mutated traces (spec.md §4.6 "Persistence") and to check the round-trip law
/// `Parse(Serialize(Trace)) == Trace` (spec.md §8).
pub fn serialize_line(event: &TraceElement) -> String {
    match &event.kind {
        EventKind::Atomic => format!(
            "A,{},{},{},{}",
            event.routine, event.t_pre, event.t_post, event.position
        ),
        EventKind::Channel {
            op,
            buffer_size,
            queue_len,
            pair_id,
        } => {
            let op_str = match op {
                ChannelOp::Send => "send",
                ChannelOp::Recv => "recv",
                ChannelOp::Close => "close",
            };
            format!(
                "C,{},{},{},{},{},{},{},{},{}",
                event.routine,
                event.t_pre,
                event.t_post,
                event.position,
                event.object_id,
                op_str,
                buffer_size,
                queue_len,
                pair_id
            )
        }
        EventKind::Mutex { op, rw } => {
            let op_str = match op {
                MutexOp::Lock => "lock",
                MutexOp::Unlock => "unlock",
                MutexOp::TryLock => "trylock",
            };
            let rw_str = match rw {
                MutexRw::Read => "R",
                MutexRw::Write => "W",
            };
            format!(
                "M,{},{},{},{},{},{},{}",
                event.routine, event.t_pre, event.t_post, event.position, event.object_id, op_str, rw_str
            )
        }
        EventKind::Fork { spawned_routine } => {
            format!("G,{},{},{}", event.routine, event.t_pre, spawned_routine)
        }
        EventKind::Select {
            cases,
            chosen,
            contains_default,
        } => format!(
            "S,{},{},{},{},{},{},{}",
            event.routine,
            event.t_pre,
            event.t_post,
            event.position,
            chosen,
            cases.len(),
            *contains_default as u8
        ),
        EventKind::WaitGroup { op, delta } => {
            let op_str = match op {
                WaitGroupOp::Add => "add",
                WaitGroupOp::Done => "done",
                WaitGroupOp::Wait => "wait",
            };
            format!(
                "W,{},{},{},{},{},{},{}",
                event.routine, event.t_pre, event.t_post, event.position, event.object_id, op_str, delta
            )
        }
        EventKind::Once { first } => format!(
            "O,{},{},{},{},{}",
            event.routine, event.t_pre, event.t_post, event.object_id, *first as u8
        ),
        EventKind::Cond { op } => {
            let op_str = match op {
                CondOp::Wait => "wait",
                CondOp::Signal => "signal",
                CondOp::Broadcast => "broadcast",
            };
            format!(
                "D,{},{},{},{},{}",
                event.routine, event.t_pre, event.t_post, event.object_id, op_str
            )
        }
        EventKind::New { type_name } => format!(
            "N,{},{},{},{},{}",
            event.routine, event.t_pre, event.t_post, event.object_id, type_name
        ),
        EventKind::RoutineEnd => format!("E,{}", event.routine),
        EventKind::ReplayControl { code } => format!("P,{},{},{}", event.routine, event.t_pre, code),
    }
}

/// Parse a `Key!Value` line from `trace_info.log`.
pub fn parse_info_line(line: &str) -> Result<(String, String), IngestionError> {
    line.trim()
        .split_once('!')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| IngestionError::MalformedInfoLine(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_atomic_line() {
        let e = parse_line("A,1,10,11,a.go:5").unwrap();
        assert_eq!(e.t_pre, 10);
        assert!(matches!(e.kind, EventKind::Atomic));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = parse_line("A,1,10,11").unwrap_err();
        assert_eq!(
            err,
            IngestionError::WrongFieldCount {
                kind: 'A',
                expected: 5,
                got: 4
            }
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = parse_line("Z,1").unwrap_err();
        assert_eq!(err, IngestionError::UnknownKind('Z'));
    }

    #[test]
    fn parses_channel_send() {
        let e = parse_line("C,2,5,6,ch.go:3,42,send,8,3,99").unwrap();
        match e.kind {
            EventKind::Channel {
                op,
                buffer_size,
                queue_len,
                pair_id,
            } => {
                assert_eq!(op, ChannelOp::Send);
                assert_eq!(buffer_size, 8);
                assert_eq!(queue_len, 3);
                assert_eq!(pair_id, 99);
            }
            _ => panic!("expected channel"),
        }
        assert_eq!(e.object_id, 42);
    }

    #[test]
    fn parses_select_with_default() {
        let e = parse_line("S,1,1,2,s.go:7,-1,3,1").unwrap();
        assert_eq!(e.position.to_string(), "s.go:7");
        match e.kind {
            EventKind::Select {
                chosen,
                contains_default,
                ref cases,
            } => {
                assert_eq!(chosen, -1);
                assert!(contains_default);
                assert_eq!(cases.len(), 3);
            }
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn selects_at_different_positions_get_distinct_ids() {
        let a = parse_line("S,1,1,2,s.go:7,0,2,0").unwrap();
        let b = parse_line("S,1,1,2,s.go:9,0,2,0").unwrap();
        assert_ne!(a.position.to_string(), b.position.to_string());
    }

    #[test]
    fn parses_info_line() {
        let (k, v) = parse_info_line("Runtime!12345").unwrap();
        assert_eq!(k, "Runtime");
        assert_eq!(v, "12345");
    }

    #[test]
    fn round_trips_through_serialize_for_every_kind() {
        let lines = [
            "A,1,10,11,a.go:5",
            "C,2,5,6,ch.go:3,42,send,8,3,99",
            "M,1,1,2,m.go:1,7,lock,W",
            "G,1,1,2",
            "S,1,1,2,s.go:7,-1,3,1",
            "W,1,1,2,w.go:1,3,add,1",
            "O,1,1,2,5,1",
            "D,1,1,2,5,signal",
            "N,1,1,2,5,Mutex",
            "E,1",
        ];
        for line in lines {
            let parsed = parse_line(line).unwrap();
            let serialized = serialize_line(&parsed);
            let reparsed = parse_line(&serialized).unwrap();
            assert_eq!(parsed, reparsed, "round-trip mismatch for {line}");
        }
    }
}
