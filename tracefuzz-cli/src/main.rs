mod driver;
mod error;
mod ingest;
mod memory;
mod options;
mod persist;
mod replay;

use clap::Parser;

use driver::{DriverOutcome, FuzzingDriver};
use error::Result;
use options::FuzzerOptions;
use replay::ProcessReplayRunner;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let options = FuzzerOptions::parse();
    std::fs::create_dir_all(&options.output)?;

    let runner = ProcessReplayRunner::new(options.replay_command.clone(), options.output.clone());
    let test_id = options.test_id.clone();
    let seed = rand::random();

    let mut driver = FuzzingDriver::new(options, runner, seed).with_memory_supervisor();
    let outcome = driver.run(&test_id);

    match outcome {
        DriverOutcome::Completed { runs } => {
            log::info!("fuzzing completed after {runs} runs");
            Ok(())
        }
        DriverOutcome::QueueEmpty { runs } => {
            log::info!("mutation queue exhausted after {runs} runs");
            Ok(())
        }
        DriverOutcome::Cancelled => {
            log::warn!("fuzzing cancelled by memory supervisor");
            Ok(())
        }
        DriverOutcome::CancelledRam => {
            log::warn!("fuzzing cancelled: free RAM fell below threshold");
            Ok(())
        }
    }
}
