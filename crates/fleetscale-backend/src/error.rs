//! Backend error types.

use thiserror::Error;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors returned by a `WorkerPoolBackend`.
///
/// None of these are fatal to the control loop; the caller logs them and
/// abandons the mutation for the current cycle.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action} failed (exit code {code}): {stderr}")]
    Command {
        action: String,
        code: i32,
        stderr: String,
    },
}
