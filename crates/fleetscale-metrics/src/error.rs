//! Sampling error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for sample collection.
pub type SampleResult<T> = Result<T, SampleError>;

/// Errors surfaced by `SamplePoller`.
///
/// A sample that is merely not there yet is not an error; it only
/// becomes one when the worker stays silent past the timeout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("no complete sample from {worker} after {attempts} polls ({waited:?})")]
    Timeout {
        worker: String,
        attempts: u32,
        waited: Duration,
    },
}
