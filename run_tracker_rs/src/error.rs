use thiserror::Error;

/// Errors surfaced by the tracker core.
///
/// Only command misuse and configuration/I/O loading produce errors. Bad fixes,
/// singular matrices and time gaps are handled inside the pipeline.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Coordinate projector used before an origin was set")]
    ProjectorNotInitialized,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tracker engine has shut down")]
    EngineStopped,
}

pub type TrackerResult<T> = Result<T, TrackerError>;
