//! Persistence of mutations to disk: `fuzzingData.log` for select/flow mutations, and
//! `fuzzingTraces/fuzzingTrace_<n>` directories for pie mutations (spec.md §4.7, §6).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracefuzz_core::parse::serialize_line;
use tracefuzz_core::trace::TraceContainer;
use tracefuzz_mutate::mutation::DelayCandidate;
use tracefuzz_mutate::select::SelectRecord;

use crate::error::Result;

/// Write the `fuzzingData.log` format from spec.md §4.7: a select section, a `#` separator,
/// then a flow section.
pub fn write_fuzzing_data(
    dir: &Path,
    selects: &[SelectRecord],
    flows: &[DelayCandidate],
) -> Result<()> {
    let mut by_position: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for select in selects {
        by_position.entry(select.id.as_str()).or_default().push(select.chosen);
    }

    let mut out = String::new();
    for (id, chosen) in by_position {
        let chosen = chosen.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
        out.push_str(&format!("{id};{chosen}\n"));
    }
    out.push_str("#\n");
    for flow in flows {
        out.push_str(&format!("{};{}\n", flow.position, flow.counter));
    }

    fs::write(dir.join("fuzzingData.log"), out)?;
    Ok(())
}

/// Serialize a mutated trace as a new `fuzzingTraces/fuzzingTrace_<n>` directory
/// (spec.md §4.6 "Persistence", step 5). Returns the path written, for the `PieChain`
/// mutation record.
pub fn write_pie_trace(output_dir: &Path, index: u64, trace: &TraceContainer) -> Result<PathBuf> {
    let dir = output_dir.join("fuzzingTraces").join(format!("fuzzingTrace_{index}"));
    fs::create_dir_all(&dir)?;

    for routine in trace.routine_ids() {
        let mut contents = String::new();
        for event in trace.routine(routine) {
            contents.push_str(&serialize_line(event));
            contents.push('\n');
        }
        fs::write(dir.join(format!("trace_{routine}.log")), contents)?;
    }

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzing_data_log_has_select_then_separator_then_flow() {
        let dir = std::env::temp_dir().join(format!("tracefuzz-persist-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let selects = vec![SelectRecord {
            id: "f.go:12".into(),
            timestamp: 0,
            chosen: 1,
            case_count: 2,
            contains_default: false,
        }];
        let flows = vec![DelayCandidate {
            position: "f.go:20".into(),
            counter: 3,
        }];

        write_fuzzing_data(&dir, &selects, &flows).unwrap();
        let contents = fs::read_to_string(dir.join("fuzzingData.log")).unwrap();
        assert_eq!(contents, "f.go:12;1\n#\nf.go:20;3\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn multiple_selects_at_the_same_position_join_onto_one_line() {
        let dir = std::env::temp_dir().join(format!("tracefuzz-persist-test-multi-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let selects = vec![
            SelectRecord {
                id: "f.go:12".into(),
                timestamp: 0,
                chosen: 1,
                case_count: 2,
                contains_default: false,
            },
            SelectRecord {
                id: "f.go:12".into(),
                timestamp: 1,
                chosen: 0,
                case_count: 2,
                contains_default: false,
            },
        ];

        write_fuzzing_data(&dir, &selects, &[]).unwrap();
        let contents = fs::read_to_string(dir.join("fuzzingData.log")).unwrap();
        assert_eq!(contents, "f.go:12;1,0\n#\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn pie_trace_round_trips_through_parser() {
        use tracefuzz_core::event::{EventKind, SourcePosition, TraceElement};

        let dir = std::env::temp_dir().join(format!("tracefuzz-persist-pie-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut trace = TraceContainer::new();
        trace.append(
            1,
            TraceElement::new(1, 0, 1, 2, SourcePosition::parse("a.go:1"), 0, EventKind::Atomic),
        );

        let written = write_pie_trace(&dir, 0, &trace).unwrap();
        let contents = fs::read_to_string(written.join("trace_1.log")).unwrap();
        let reparsed = tracefuzz_core::parse::parse_line(contents.trim()).unwrap();
        assert!(matches!(reparsed.kind, EventKind::Atomic));

        fs::remove_dir_all(&dir).unwrap();
    }
}
