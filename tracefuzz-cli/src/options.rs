use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Fuzzing strategy set and HB usage (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FuzzingMode {
    GFuzz,
    GFuzzHb,
    GFuzzHbFlow,
    Flow,
    GoPie,
    GoPieHb,
}

impl FuzzingMode {
    pub fn is_hb_augmented(self) -> bool {
        matches!(
            self,
            FuzzingMode::GFuzzHb | FuzzingMode::GFuzzHbFlow | FuzzingMode::GoPieHb
        )
    }

    pub fn runs_gfuzz(self) -> bool {
        matches!(
            self,
            FuzzingMode::GFuzz | FuzzingMode::GFuzzHb | FuzzingMode::GFuzzHbFlow
        )
    }

    pub fn runs_flow(self) -> bool {
        matches!(self, FuzzingMode::Flow | FuzzingMode::GFuzzHbFlow)
    }

    pub fn runs_gopie(self) -> bool {
        matches!(self, FuzzingMode::GoPie | FuzzingMode::GoPieHb)
    }
}

/// Named options from spec.md §6 "Configuration", exposed as `clap` fields in the
/// teacher's style (see `fuzzamoto-libafl::options::FuzzerOptions` for the model).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "Concurrency-trace fuzzing driver")]
pub struct FuzzerOptions {
    #[arg(long, help = "Directory holding the recorded trace to start from")]
    pub input: PathBuf,

    #[arg(long, help = "Directory to write fuzzingData.log / fuzzingTraces into")]
    pub output: PathBuf,

    #[arg(long, value_enum, help = "Mutator set and HB usage")]
    pub fuzzing_mode: FuzzingMode,

    #[arg(long, help = "Hard cap on replay iterations per test", default_value_t = 20)]
    pub max_number_runs: u32,

    #[arg(long, help = "Wallclock cap per test, in minutes", default_value_t = 60)]
    pub max_time_minutes: u64,

    #[arg(long, help = "Re-enqueue quota per mutation fingerprint", default_value_t = 2)]
    pub max_run_per_mut: u32,

    #[arg(long, help = "Flow mutations emitted per ingestion", default_value_t = 10)]
    pub max_flow_mut: usize,

    #[arg(long, help = "Chain-length gate for substitute/augment", default_value_t = 3)]
    pub bound: usize,

    #[arg(long, help = "Pie mutation working-set size cap", default_value_t = 128)]
    pub mutatebound: usize,

    #[arg(long, help = "Emit one flow mutation per delay candidate instead of bundling", default_value_t = false)]
    pub one_mut_per_delay: bool,

    #[arg(long, help = "Timeout for a single replay, in seconds", default_value_t = 30)]
    pub replay_timeout_secs: u64,

    #[arg(long, help = "Path to the external build+record+replay runner")]
    pub replay_command: PathBuf,

    #[arg(long, help = "Test identity passed through to the replay runner")]
    pub test_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hb_modes_are_identified_correctly() {
        assert!(FuzzingMode::GFuzzHb.is_hb_augmented());
        assert!(FuzzingMode::GoPieHb.is_hb_augmented());
        assert!(!FuzzingMode::GFuzz.is_hb_augmented());
        assert!(!FuzzingMode::Flow.is_hb_augmented());
    }

    #[test]
    fn mode_routing_matches_spec_table() {
        assert!(FuzzingMode::GFuzzHbFlow.runs_gfuzz());
        assert!(FuzzingMode::GFuzzHbFlow.runs_flow());
        assert!(!FuzzingMode::GFuzzHbFlow.runs_gopie());
        assert!(FuzzingMode::GoPie.runs_gopie());
        assert!(!FuzzingMode::GoPie.runs_gfuzz());
    }
}
