//! Failure taxonomy shared by the gateway, steps, and pipeline.
//!
//! The gateway returns these directly so callers can branch on the kind
//! (the job step recovers `Conflict`); everything above the gateway wraps
//! them in `anyhow` with context.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    /// A required key is missing or a value does not parse.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No usable control-plane or container-engine binary.
    #[error("{0}")]
    ToolResolution(String),

    /// Non-zero exit from an external program.
    #[error("{program} failed ({status}): {detail}")]
    ExternalCommand {
        program: String,
        status: String,
        detail: String,
    },

    /// The named resource already exists.
    #[error("{program} reported an existing resource: {detail}")]
    Conflict { program: String, detail: String },

    #[error("could not resolve image registry URL: {0}")]
    RegistryResolution(String),

    #[error("missing secret value for {name} (set {hint})")]
    MissingSecret { name: String, hint: String },

    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeployError::Conflict { .. })
    }
}
