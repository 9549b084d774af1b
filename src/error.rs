use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// `Parse` and `PropagationDiverged` are per-record / per-satellite
/// failures: the pipeline records them as diagnostics and keeps going.
/// `InvalidConfig` and `InvalidGeometry` indicate a caller bug and abort
/// the run. Empty candidate sets and non-converged optimization are not
/// errors anywhere in this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed element record ({context}): {message}")]
    Parse { context: String, message: String },

    #[error("propagation diverged for satellite {satellite_id}: {reason}")]
    PropagationDiverged { satellite_id: u64, reason: String },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("catalog contained no usable element sets")]
    EmptyCatalog,

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
