//! Route table publication errors.

use std::path::PathBuf;

use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors while rendering or publishing a route table.
///
/// A failed publication leaves the load balancer on its previous table.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed (exit code {code}): {stderr}")]
    Reload {
        command: String,
        code: i32,
        stderr: String,
    },
}
