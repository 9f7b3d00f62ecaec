use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can end a run of the harness.
///
/// None of these are retried. A violation or an anomaly is evidence of a real
/// defect in the map under test and is handed straight back to the caller.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("round {round}: linearizability violation saved to {}", artifact.display())]
    SpecificationViolation { round: usize, artifact: PathBuf },

    #[error("observed r1=0 && r2=0 in trial {trial} of {trials} (probe: {probe}, reuse: {reuse}, scheduler: {scheduler})")]
    OrderingAnomaly {
        trial: usize,
        trials: usize,
        probe: String,
        reuse: String,
        scheduler: String,
    },

    #[error("round {round}: checker gave up after {timeout_ms}ms without a verdict")]
    InconclusiveTimeout { round: usize, timeout_ms: u128 },

    #[error("failed to persist violation artifact {}: {source}", path.display())]
    ArtifactPersistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
