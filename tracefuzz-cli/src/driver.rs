//! The fuzzing driver (spec.md §4.8): energy/score-based mutation budgeting, the main loop,
//! termination, and persistence orchestration.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::SeedableRng;

use tracefuzz_core::event::EventKind;
use tracefuzz_core::relations;
use tracefuzz_core::state::RunStats;
use tracefuzz_core::trace::TraceContainer;
use tracefuzz_mutate::energy::{self, EnergyState};
use tracefuzz_mutate::flow::{self, FlowState};
use tracefuzz_mutate::gopie;
use tracefuzz_mutate::mutation::{DelayCandidate, MutationRecord};
use tracefuzz_mutate::queue::MutationQueue;
use tracefuzz_mutate::select::{self, GFuzzState, SelectRecord};

use crate::ingest::ingest_trace_dir;
use crate::memory::MemorySupervisor;
use crate::options::{FuzzerOptions, FuzzingMode};
use crate::persist::{write_fuzzing_data, write_pie_trace};
use crate::replay::{ReplayRunner, ReplayOutcome};

/// How the driver's main loop ended, including the two resource-cancellation outcomes from
/// spec.md §7.iii.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    Completed { runs: u32 },
    QueueEmpty { runs: u32 },
    Cancelled,
    CancelledRam,
}

/// Owns every piece of mutable fuzzing state exclusively (spec.md §5 "Concurrency model"):
/// the queue, the dedup sets, and the score maxima. Mutated only by the driver's own call
/// chain, never shared.
pub struct FuzzingDriver<R: ReplayRunner> {
    options: FuzzerOptions,
    runner: R,
    queue: MutationQueue,
    gfuzz_state: GFuzzState,
    flow_state: FlowState,
    energy_state: EnergyState,
    pie_fingerprints: std::collections::HashSet<String>,
    pie_trace_counter: u64,
    rng: SmallRng,
    memory: Option<MemorySupervisor>,
}

impl<R: ReplayRunner> FuzzingDriver<R> {
    pub fn new(options: FuzzerOptions, runner: R, seed: u64) -> Self {
        let max_run_per_mut = options.max_run_per_mut;
        Self {
            options,
            runner,
            queue: MutationQueue::new(max_run_per_mut),
            gfuzz_state: GFuzzState::new(),
            flow_state: FlowState::new(),
            energy_state: EnergyState::new(),
            pie_fingerprints: std::collections::HashSet::new(),
            pie_trace_counter: 0,
            rng: SmallRng::seed_from_u64(seed),
            memory: None,
        }
    }

    pub fn with_memory_supervisor(mut self) -> Self {
        self.memory = Some(MemorySupervisor::spawn());
        self
    }

    fn cancellation(&self) -> Option<DriverOutcome> {
        let memory = self.memory.as_ref()?;
        if memory.is_cancelled_ram() {
            Some(DriverOutcome::CancelledRam)
        } else if memory.is_cancelled() {
            Some(DriverOutcome::Cancelled)
        } else {
            None
        }
    }

    /// Run the spec.md §4.8 pseudo-contract loop to completion.
    pub fn run(&mut self, test_id: &str) -> DriverOutcome {
        let mode = self.options.fuzzing_mode;
        let hb_augmented = mode.is_hb_augmented();
        let deadline = Instant::now() + Duration::from_secs(self.options.max_time_minutes * 60);
        let mut runs: u32 = 0;

        loop {
            if let Some(outcome) = self.cancellation() {
                return outcome;
            }

            if runs > 0 {
                let Some(mutation) = self.queue.pop_front() else {
                    return DriverOutcome::QueueEmpty { runs };
                };
                if let Err(err) = self.stage_mutation(&mutation) {
                    log::error!("failed to stage mutation for replay: {err}");
                }
            }

            let timeout = Duration::from_secs(self.options.replay_timeout_secs);
            let seed_dir = (runs == 0).then_some(self.options.input.as_path());
            let replay_result = self.runner.run_replay(mode, test_id, timeout, seed_dir);

            runs += 1;

            let outcome = match replay_result {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::warn!("replay failed: {err}");
                    if runs > self.options.max_number_runs || Instant::now() >= deadline {
                        return DriverOutcome::Completed { runs };
                    }
                    continue;
                }
            };

            self.ingest_and_enqueue(&outcome, hb_augmented);

            if runs > self.options.max_number_runs || Instant::now() >= deadline {
                return DriverOutcome::Completed { runs };
            }
        }
    }

    fn stage_mutation(&self, mutation: &MutationRecord) -> crate::error::Result<()> {
        match mutation {
            MutationRecord::SelectFlip(records) => {
                write_fuzzing_data(&self.options.output, records, &[])
            }
            MutationRecord::FlowDelay(candidates) => {
                write_fuzzing_data(&self.options.output, &[], candidates)
            }
            MutationRecord::PieChain(_path) => Ok(()),
        }
    }

    fn ingest_and_enqueue(&mut self, outcome: &ReplayOutcome, hb_augmented: bool) {
        let (mut trace, mut stats) = match ingest_trace_dir(&outcome.trace_dir) {
            Ok(v) => v,
            Err(err) => {
                log::warn!("ingestion failed: {err}");
                return;
            }
        };

        let mode = self.options.fuzzing_mode;

        if mode.runs_gfuzz() {
            self.enqueue_select_mutations(&trace, &mut stats, hb_augmented);
        }

        if mode.runs_flow() {
            self.enqueue_flow_mutations(&trace);
        }

        if mode.runs_gopie() {
            self.enqueue_pie_mutations(&mut trace, hb_augmented);
        }

        stats.finish_run();
    }

    fn enqueue_select_mutations(&mut self, trace: &TraceContainer, stats: &mut RunStats, hb_augmented: bool) {
        let selects = extract_select_records(trace);
        let score = select::compute_score(&trace.counters, stats, hb_augmented);

        if !select::is_interesting(&selects, score, &self.gfuzz_state) {
            self.gfuzz_state.observe_score(score);
            return;
        }

        let candidates = select::create_select_mutations(
            &selects,
            score,
            &mut self.gfuzz_state,
            &mut self.rng,
        );
        for candidate in candidates {
            if !stats.record_mutation(fingerprint_hash(&candidate)) {
                continue;
            }
            self.queue.try_enqueue(candidate);
        }
    }

    fn enqueue_flow_mutations(&mut self, trace: &TraceContainer) {
        let candidates = derive_delay_candidates(trace);
        let mutations = flow::create_flow_mutations(
            &candidates,
            &mut self.flow_state,
            self.options.one_mut_per_delay,
            self.options.max_flow_mut,
        );
        for mutation in mutations {
            self.queue.try_enqueue(mutation);
        }
    }

    fn enqueue_pie_mutations(&mut self, trace: &mut TraceContainer, hb_augmented: bool) {
        let counts = relations::compute_relations(trace, hb_augmented);
        let chains = relations::build_chains(trace);

        let score = energy::chain_mutation_score(counts.cpop1, counts.cpop2, chains.len());
        let energy = energy::compute_energy(
            score,
            &mut self.energy_state,
            trace.counters.timeout,
            chains.len(),
        );

        for chain in &chains {
            let mutated_chains = gopie::mutate_chain(
                trace,
                chain,
                energy,
                self.options.bound,
                self.options.mutatebound,
                &mut self.rng,
            );
            for mutated in mutated_chains {
                if !gopie::is_valid_chain(trace, &mutated, hb_augmented) {
                    continue;
                }
                let fp = gopie::chain_fingerprint(trace, &mutated);
                if !self.pie_fingerprints.insert(fp) {
                    continue;
                }
                let Some(mutated_trace) = gopie::build_mutated_trace(trace, &mutated) else {
                    continue;
                };
                let index = self.pie_trace_counter;
                self.pie_trace_counter += 1;
                match write_pie_trace(&self.options.output, index, &mutated_trace) {
                    Ok(path) => {
                        self.queue.try_enqueue(MutationRecord::PieChain(path));
                    }
                    Err(err) => log::error!("failed to persist pie trace: {err}"),
                }
            }
        }
    }
}

/// Hash a mutation's fingerprint down to a `u64` for `RunStats::record_mutation`'s per-run
/// novelty check, ahead of (and independent from) the queue's own cross-run quota accounting.
fn fingerprint_hash(record: &MutationRecord) -> u64 {
    let mut hasher = DefaultHasher::new();
    tracefuzz_mutate::fingerprint(record).hash(&mut hasher);
    hasher.finish()
}

/// Recover `SelectRecord`s from the ingested trace's `Select` events (GFuzz's view of the
/// trace, spec.md §4.4).
fn extract_select_records(trace: &TraceContainer) -> Vec<SelectRecord> {
    trace
        .all_events()
        .filter_map(|event| match &event.kind {
            EventKind::Select {
                cases,
                chosen,
                contains_default,
            } => Some(SelectRecord {
                id: event.position.to_string(),
                timestamp: event.t_pre,
                chosen: *chosen,
                case_count: cases.len(),
                contains_default: *contains_default,
            }),
            _ => None,
        })
        .collect()
}

/// Group once/mutex/send/recv events by source position, assigning each repeat occurrence
/// at that position an incrementing counter (spec.md §4.5).
fn derive_delay_candidates(trace: &TraceContainer) -> Vec<DelayCandidate> {
    let mut seen_at_position: HashMap<String, u32> = HashMap::new();
    let mut candidates = Vec::new();

    for event in trace.all_events() {
        let is_delay_candidate = matches!(
            &event.kind,
            EventKind::Once { .. } | EventKind::Mutex { .. }
        ) || matches!(
            &event.kind,
            EventKind::Channel { op, .. } if matches!(
                op,
                tracefuzz_core::event::ChannelOp::Send | tracefuzz_core::event::ChannelOp::Recv
            )
        );

        if !is_delay_candidate {
            continue;
        }

        let position = event.position.to_string();
        let counter = seen_at_position.entry(position.clone()).or_insert(0);
        candidates.push(DelayCandidate {
            position,
            counter: *counter,
        });
        *counter += 1;
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::NullReplayRunner;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_file(dir: &std::path::Path, name: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn test_options(output: PathBuf, mode: FuzzingMode) -> FuzzerOptions {
        FuzzerOptions {
            input: output.clone(),
            output,
            fuzzing_mode: mode,
            max_number_runs: 2,
            max_time_minutes: 60,
            max_run_per_mut: 2,
            max_flow_mut: 10,
            bound: 3,
            mutatebound: 128,
            one_mut_per_delay: true,
            replay_timeout_secs: 5,
            replay_command: PathBuf::from("/bin/true"),
            test_id: "test".to_string(),
        }
    }

    #[test]
    fn driver_stops_when_queue_is_empty_and_nothing_interesting() {
        let dir = std::env::temp_dir().join(format!("tracefuzz-driver-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_file(&dir, "trace_1.log", "A,1,1,2,a.go:1\n");
        write_file(&dir, "trace_info.log", "Runtime!1\nReplayTimeout!0\n");

        let options = test_options(dir.clone(), FuzzingMode::GFuzz);
        let runner = NullReplayRunner::new(dir.clone());
        let mut driver = FuzzingDriver::new(options, runner, 42);

        let outcome = driver.run("test-1");
        assert!(matches!(outcome, DriverOutcome::QueueEmpty { runs: 1 }));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn driver_enqueues_select_mutation_and_runs_again() {
        let dir = std::env::temp_dir().join(format!("tracefuzz-driver-test-select-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_file(
            &dir,
            "trace_1.log",
            "S,1,1,2,sel.go:1,0,2,0\nC,1,3,4,c.go:1,9,send,4,1,7\n",
        );
        write_file(&dir, "trace_info.log", "Runtime!1\nReplayTimeout!0\n");

        let options = test_options(dir.clone(), FuzzingMode::GFuzz);
        let runner = NullReplayRunner::new(dir.clone());
        let mut driver = FuzzingDriver::new(options, runner, 7);

        let outcome = driver.run("test-2");
        match outcome {
            DriverOutcome::Completed { runs } | DriverOutcome::QueueEmpty { runs } => {
                assert!(runs >= 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        fs::remove_dir_all(&dir).unwrap();
    }
}
