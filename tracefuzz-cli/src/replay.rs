//! The single external collaborator: one blocking call that builds/executes the
//! program-under-test with the current mutation applied (spec.md §6 "Replay interface").

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use crate::options::FuzzingMode;

fn mode_arg(mode: FuzzingMode) -> &'static str {
    match mode {
        FuzzingMode::GFuzz => "gfuzz",
        FuzzingMode::GFuzzHb => "gfuzz-hb",
        FuzzingMode::GFuzzHbFlow => "gfuzz-hb-flow",
        FuzzingMode::Flow => "flow",
        FuzzingMode::GoPie => "go-pie",
        FuzzingMode::GoPieHb => "go-pie-hb",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    Timeout,
    ProcessFailed(String),
    NoTraceProduced,
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Timeout => write!(f, "replay timed out"),
            ReplayError::ProcessFailed(msg) => write!(f, "replay process failed: {msg}"),
            ReplayError::NoTraceProduced => write!(f, "replay produced no trace directory"),
        }
    }
}

impl std::error::Error for ReplayError {}

/// Result of one successful replay: where the resulting trace directory landed.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub trace_dir: PathBuf,
}

/// The program-under-test toolchain, reached through a single blocking call
/// (spec.md §1, §6). Building and spawning the real toolchain is out of scope; only the
/// trait and a null implementation for tests live here.
pub trait ReplayRunner {
    /// `seed_dir`, when present, is the recorded trace the driver wants replayed as-is
    /// (spec.md §4.8 "run 0" — the first iteration of a test, before any mutation exists).
    /// Later iterations pass `None`; the runner replays whatever mutation it was staged with.
    fn run_replay(
        &mut self,
        mode: FuzzingMode,
        test_id: &str,
        timeout: Duration,
        seed_dir: Option<&std::path::Path>,
    ) -> Result<ReplayOutcome, ReplayError>;
}

/// A `ReplayRunner` that returns a fixed, pre-seeded trace directory without spawning any
/// process. Used by driver tests so the fuzzing loop can be exercised without a real
/// program-under-test toolchain.
pub struct NullReplayRunner {
    pub trace_dir: PathBuf,
    pub calls: usize,
}

impl NullReplayRunner {
    pub fn new(trace_dir: PathBuf) -> Self {
        Self {
            trace_dir,
            calls: 0,
        }
    }
}

impl ReplayRunner for NullReplayRunner {
    fn run_replay(
        &mut self,
        _mode: FuzzingMode,
        _test_id: &str,
        _timeout: Duration,
        _seed_dir: Option<&std::path::Path>,
    ) -> Result<ReplayOutcome, ReplayError> {
        self.calls += 1;
        Ok(ReplayOutcome {
            trace_dir: self.trace_dir.clone(),
        })
    }
}

/// Shells out to an external build+record+replay runner (spec.md §6 "Replay interface"):
/// spawns it with `--mode`/`--test-id`/`--workdir`, polls for completion, kills on timeout.
pub struct ProcessReplayRunner {
    command: PathBuf,
    workdir: PathBuf,
}

impl ProcessReplayRunner {
    pub fn new(command: PathBuf, workdir: PathBuf) -> Self {
        Self { command, workdir }
    }
}

impl ReplayRunner for ProcessReplayRunner {
    fn run_replay(
        &mut self,
        mode: FuzzingMode,
        test_id: &str,
        timeout: Duration,
        seed_dir: Option<&std::path::Path>,
    ) -> Result<ReplayOutcome, ReplayError> {
        let mut command = Command::new(&self.command);
        command
            .arg("--mode")
            .arg(mode_arg(mode))
            .arg("--test-id")
            .arg(test_id)
            .arg("--workdir")
            .arg(&self.workdir);
        if let Some(seed_dir) = seed_dir {
            command.arg("--seed-dir").arg(seed_dir);
        }
        let mut child = command
            .spawn()
            .map_err(|e| ReplayError::ProcessFailed(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => break,
                Ok(Some(status)) => {
                    return Err(ReplayError::ProcessFailed(format!("exit status {status}")));
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ReplayError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(ReplayError::ProcessFailed(e.to_string())),
            }
        }

        let trace_dir = self.workdir.join("trace");
        if !trace_dir.exists() {
            return Err(ReplayError::NoTraceProduced);
        }
        Ok(ReplayOutcome { trace_dir })
    }
}
