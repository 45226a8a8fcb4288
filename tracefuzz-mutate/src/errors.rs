use std::fmt;

/// Errors raised by the mutation engine itself (not by trace ingestion, see
/// `tracefuzz_core::IngestionError`, and not by the driver, see `DriverError` in
/// `tracefuzz-cli`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    EmptyChain,
    ChainTooLong { len: usize, bound: usize },
    UnresolvedEventRef,
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationError::EmptyChain => write!(f, "scheduling chain is empty"),
            MutationError::ChainTooLong { len, bound } => {
                write!(f, "chain length {len} exceeds bound {bound}")
            }
            MutationError::UnresolvedEventRef => {
                write!(f, "event reference did not resolve in the trace container")
            }
        }
    }
}

impl std::error::Error for MutationError {}
