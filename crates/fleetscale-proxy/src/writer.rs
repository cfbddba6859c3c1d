//! Route table publication.
//!
//! `HaproxyWriter` replaces the config file atomically: the new content
//! goes to a temporary file in the same directory, is synced, and is then
//! renamed over the old file, so the proxy never reads a torn config.
//! A reload command is run afterwards.

use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use fleet_core::config::RouteTableConfig;

use crate::error::{ProxyError, ProxyResult};

/// Persists a full routing config and makes the load balancer apply it.
pub trait RouteTableWriter: Send + Sync {
    /// Replace the whole config with `config_text`.
    fn rewrite(&self, config_text: &str) -> impl Future<Output = ProxyResult<()>> + Send;

    /// Make the load balancer pick up the current config.
    fn reload(&self) -> impl Future<Output = ProxyResult<()>> + Send;
}

/// Writes an HAProxy config file and reloads the service.
#[derive(Debug, Clone)]
pub struct HaproxyWriter {
    config_path: PathBuf,
    reload_command: Vec<String>,
    status_command: Option<Vec<String>>,
}

impl HaproxyWriter {
    pub fn new(config_path: impl Into<PathBuf>, reload_command: Vec<String>) -> Self {
        Self {
            config_path: config_path.into(),
            reload_command,
            status_command: None,
        }
    }

    pub fn from_config(config: &RouteTableConfig) -> Self {
        Self {
            config_path: config.config_path.clone(),
            reload_command: config.reload_command.clone(),
            status_command: config.status_command.clone(),
        }
    }

    /// Run this command after every successful reload and log its output.
    pub fn with_status_command(mut self, command: Vec<String>) -> Self {
        self.status_command = Some(command);
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl RouteTableWriter for HaproxyWriter {
    async fn rewrite(&self, config_text: &str) -> ProxyResult<()> {
        let path = self.config_path.clone();
        let text = config_text.to_string();

        let written = tokio::task::spawn_blocking(move || replace_file(&path, &text))
            .await
            .map_err(|e| ProxyError::Write {
                path: self.config_path.clone(),
                source: std::io::Error::other(e),
            })?;
        written?;

        debug!(path = ?self.config_path, bytes = config_text.len(), "route table written");
        Ok(())
    }

    async fn reload(&self) -> ProxyResult<()> {
        let stdout = run_command(&self.reload_command).await?;
        info!(command = %self.reload_command.join(" "), "load balancer reloaded");
        if !stdout.trim().is_empty() {
            debug!(output = %stdout.trim(), "reload output");
        }

        if let Some(status) = &self.status_command {
            match run_command(status).await {
                Ok(out) => info!(status = %out.trim(), "load balancer status"),
                Err(e) => warn!(error = %e, "load balancer status check failed"),
            }
        }
        Ok(())
    }
}

/// Write `text` to a temp file next to `path` and rename it into place.
///
/// Permissions of an existing file are carried over.
fn replace_file(path: &Path, text: &str) -> ProxyResult<()> {
    let write_err = |source| ProxyError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(text.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file()
            .set_permissions(meta.permissions())
            .map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Run an argv-style command, returning stdout on success.
async fn run_command(argv: &[String]) -> ProxyResult<String> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ProxyError::Reload {
            command: String::new(),
            code: -1,
            stderr: "empty command".to_string(),
        });
    };

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| ProxyError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProxyError::Reload {
            command: argv.join(" "),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn rewrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haproxy.cfg");
        std::fs::write(&path, "old content that is much longer than the new one\n").unwrap();

        let writer = HaproxyWriter::new(&path, argv(&["true"]));
        writer.rewrite("new\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn rewrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haproxy.cfg");

        let writer = HaproxyWriter::new(&path, argv(&["true"]));
        writer.rewrite("a\n").await.unwrap();
        writer.rewrite("b\n").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("haproxy.cfg")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rewrite_keeps_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haproxy.cfg");
        std::fs::write(&path, "old\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let writer = HaproxyWriter::new(&path, argv(&["true"]));
        writer.rewrite("new\n").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn rewrite_into_missing_directory_fails() {
        let writer = HaproxyWriter::new("/nonexistent/dir/haproxy.cfg", argv(&["true"]));
        let err = writer.rewrite("x\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::Write { .. }));
    }

    #[tokio::test]
    async fn reload_runs_command() {
        let writer = HaproxyWriter::new("unused.cfg", argv(&["true"]))
            .with_status_command(argv(&["echo", "active"]));
        writer.reload().await.unwrap();
    }

    #[tokio::test]
    async fn failed_reload_is_reported() {
        let writer = HaproxyWriter::new("unused.cfg", argv(&["false"]));
        let err = writer.reload().await.unwrap_err();
        assert!(matches!(err, ProxyError::Reload { ref command, .. } if command == "false"));
    }

    #[tokio::test]
    async fn failed_status_check_does_not_fail_reload() {
        let writer = HaproxyWriter::new("unused.cfg", argv(&["true"]))
            .with_status_command(argv(&["false"]));
        writer.reload().await.unwrap();
    }

    #[tokio::test]
    async fn missing_reload_binary_is_spawn_error() {
        let writer = HaproxyWriter::new("unused.cfg", argv(&["/nonexistent/reload"]));
        let err = writer.reload().await.unwrap_err();
        assert!(matches!(err, ProxyError::Spawn { .. }));
    }
}
