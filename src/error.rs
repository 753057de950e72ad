use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a simulation run.
///
/// Numerical non-convergence for a single vertex-channel pair is never an
/// error; it shows up as an empty set of ray tracing solutions instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A named preset (ice model, attenuation model, antenna) does not exist.
    #[error("unknown {kind} `{name}`")]
    UnknownPreset { kind: &'static str, name: String },

    /// Pre-simulated ray tracing results were requested from a ray tracer that
    /// cannot rebuild solutions from stored parameters.
    #[error("ray tracer `{0}` cannot reuse pre-simulated ray tracing results")]
    CacheUnsupported(String),

    /// Auxiliary data required by the current configuration is absent.
    #[error("missing data: {0}")]
    MissingData(String),

    /// The antenna or signal chain response could not be evaluated.
    #[error("antenna response for station {station}, channel {channel}: {reason}")]
    AntennaResponse {
        station: u32,
        channel: u32,
        reason: String,
    },

    /// The input event table is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid distance cut: {0}")]
    DistanceCut(String),

    #[error(transparent)]
    DistanceCutParse(#[from] crate::distance_cut::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
