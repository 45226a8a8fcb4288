//! Trace ingestion: read a `trace_<routine>.log` + `trace_info.log` directory into a
//! `TraceContainer` and a `RunStats` (spec.md §4.2a, §6).

use std::fs;
use std::path::Path;

use tracefuzz_core::event::EventKind;
use tracefuzz_core::parse::{parse_info_line, parse_line};
use tracefuzz_core::state::RunStats;
use tracefuzz_core::trace::TraceContainer;

use crate::error::{CliError, Result};

/// Ingest every `trace_<routine>.log` file and `trace_info.log` under `dir`.
///
/// Malformed lines are logged and skipped (spec.md §7.i); ingestion only fails if `dir`
/// itself cannot be read.
pub fn ingest_trace_dir(dir: &Path) -> Result<(TraceContainer, RunStats)> {
    let mut trace = TraceContainer::new();
    let mut stats = RunStats::new();

    let mut routine_files: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let routine: usize = name.strip_prefix("trace_")?.strip_suffix(".log")?.parse().ok()?;
            Some((routine, entry.path()))
        })
        .collect();
    routine_files.sort_by_key(|(routine, _)| *routine);

    for (routine, path) in routine_files {
        let contents = fs::read_to_string(&path)?;
        for line in contents.lines() {
            match parse_line(line) {
                Ok(event) => {
                    if let EventKind::Channel { queue_len, buffer_size, pair_id, op, .. } = &event.kind {
                        let is_close = matches!(op, tracefuzz_core::event::ChannelOp::Close);
                        trace.counters.observe_channel_op(event.object_id, *queue_len, is_close);
                        if *queue_len >= *buffer_size {
                            stats.record_saturation(event.object_id);
                        }
                        if *pair_id != 0 {
                            stats.record_pair(event.object_id, *pair_id);
                        }
                    }
                    if let EventKind::Select { chosen, .. } = &event.kind {
                        if *chosen >= 0 {
                            stats.record_select_hit(event.object_id, *chosen as usize);
                            trace.counters.select_cases_with_partner += 1;
                        }
                    }
                    trace.append(routine, event);
                }
                Err(err) => {
                    log::warn!("skipping malformed line in {}: {}", path.display(), err);
                }
            }
        }
    }

    let info_path = dir.join("trace_info.log");
    if info_path.exists() {
        let contents = fs::read_to_string(&info_path)?;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_info_line(line) {
                Ok((key, value)) => apply_info(&mut trace, &key, &value),
                Err(err) => log::warn!("skipping malformed trace_info.log line: {}", err),
            }
        }
    } else {
        return Err(CliError::InvalidInput(format!(
            "missing trace_info.log in {}",
            dir.display()
        )));
    }

    Ok((trace, stats))
}

fn apply_info(trace: &mut TraceContainer, key: &str, value: &str) {
    match key {
        "Runtime" => {
            if let Ok(duration) = value.parse() {
                trace.counters.runtime_duration = duration;
            }
        }
        "ReplayTimeout" => {
            trace.counters.timeout = value == "1" || value.eq_ignore_ascii_case("true");
        }
        "ExitCode" | "ExitPosition" | "ReplayDisabled" | "ReplayAck" => {
            log::debug!("trace_info.log: {key}={value}");
        }
        other => log::debug!("trace_info.log: unrecognized key {other}={value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn ingests_routine_files_in_numeric_order() {
        let dir = std::env::temp_dir().join(format!("tracefuzz-ingest-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        write_file(&dir, "trace_2.log", "A,2,1,2,a.go:1");
        write_file(&dir, "trace_1.log", "A,1,1,2,a.go:1");
        write_file(&dir, "trace_info.log", "Runtime!42\nReplayTimeout!0\n");

        let (trace, _stats) = ingest_trace_dir(&dir).unwrap();
        assert_eq!(trace.num_routines(), 2);
        assert_eq!(trace.counters.runtime_duration, 42);
        assert!(!trace.counters.timeout);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = std::env::temp_dir().join(format!("tracefuzz-ingest-test-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        write_file(&dir, "trace_1.log", "A,1,1,2,a.go:1\nnot-a-valid-line\n");
        write_file(&dir, "trace_info.log", "Runtime!1\n");

        let (trace, _stats) = ingest_trace_dir(&dir).unwrap();
        assert_eq!(trace.routine(1).len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }
}
