use thiserror::Error;

/// Errors surfaced by the simulation engine.
///
/// Construction-time shape problems and runtime sampling inconsistencies are
/// unrecoverable; callers are expected to fix the model definition rather
/// than retry.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid extrande ratio {0}: the bound multiplier must be at least 1")]
    InvalidExtrandeRatio(f64),

    #[error(
        "extrande bound exceeded: cached bound {bound} is below the current total propensity \
         {total}; increase the extrande ratio"
    )]
    ExtrandeBoundExceeded { bound: f64, total: f64 },

    #[error("reaction selection walked past every channel without a match")]
    SamplingOverflow,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("trajectory output error: {0}")]
    Io(#[from] std::io::Error),
}
