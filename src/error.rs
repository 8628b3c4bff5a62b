use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of the computation engine itself (as opposed to a run that
/// completed and reported `succeeded = false`)
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn runtime '{runtime}': {source}")]
    Spawn {
        runtime: String,
        #[source]
        source: io::Error,
    },

    #[error("Execution timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("I/O error during execution: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed engine output: {0}")]
    InvalidOutput(String),

    #[error("Execution failed: {0}")]
    Failed(String),
}

/// Outcome of a dispatch that could not produce a result
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Computation failed for '{entity}': {source}")]
    Engine {
        entity: String,
        #[source]
        source: EngineError,
    },
}

/// Failure while writing a result to an output sink
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Output I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Result file not readable: {}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bundle result files: {0}")]
    Archive(String),
}

/// An entity definition that cannot be loaded
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Failed to read definition {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Invalid definition {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Unsupported runtime '{0}'")]
    UnsupportedRuntime(String),
}
