//! Container CLI backend.
//!
//! Drives a docker-compatible command line (`docker`, `podman`, ...):
//!
//! ```text
//! create      → <runtime> run -d --name N --memory BYTES -p HOST:PORT TEMPLATE [CMD...]
//! remove      → <runtime> rm -f N
//! exists      → <runtime> ps -a --format "{{.ID}} {{.Names}}"
//! list_active → <runtime> ps --format "{{.ID}} {{.Names}}"
//! ```
//!
//! `exists` also sees stopped containers, since their names still block
//! `run --name` and still need `rm -f`.

use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::{WorkerInstance, WorkerPoolBackend, WorkerSpec};
use crate::error::{BackendError, BackendResult};

const PS_FORMAT: &str = "{{.ID}} {{.Names}}";

/// `WorkerPoolBackend` backed by a container runtime's CLI.
#[derive(Debug, Clone)]
pub struct ContainerCliBackend {
    runtime: String,
}

impl ContainerCliBackend {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Run the CLI and return stdout, failing on a non-zero exit.
    async fn exec(&self, action: &str, args: &[String]) -> BackendResult<String> {
        debug!(runtime = %self.runtime, ?args, "executing container command");

        let output = Command::new(&self.runtime)
            .args(args)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                program: self.runtime.clone(),
                source,
            })?;

        check_output(action, output)
    }
}

impl WorkerPoolBackend for ContainerCliBackend {
    async fn create(&self, spec: &WorkerSpec) -> BackendResult<WorkerInstance> {
        if self.exists(&spec.name).await? {
            return Err(BackendError::AlreadyExists(spec.name.clone()));
        }

        let stdout = self.exec("create", &run_args(spec)).await?;
        let instance = WorkerInstance {
            name: spec.name.clone(),
            id: stdout.trim().to_string(),
        };
        info!(name = %instance.name, id = %instance.id, "instance created");
        Ok(instance)
    }

    async fn remove(&self, name: &str) -> BackendResult<()> {
        if !self.exists(name).await? {
            return Err(BackendError::NotFound(name.to_string()));
        }

        let args = ["rm".to_string(), "-f".to_string(), name.to_string()];
        self.exec("remove", &args).await?;
        info!(%name, "instance removed");
        Ok(())
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        let stdout = self.exec("list", &ps_args(true)).await?;
        Ok(parse_ps_output(&stdout).iter().any(|i| i.name == name))
    }

    async fn list_active(&self) -> BackendResult<Vec<WorkerInstance>> {
        let stdout = self.exec("list", &ps_args(false)).await?;
        Ok(parse_ps_output(&stdout))
    }
}

/// Build the `run` invocation for a worker.
fn run_args(spec: &WorkerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--memory".to_string(),
        spec.memory_limit_bytes.to_string(),
    ];
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port.host, port.container));
    }
    args.push(spec.template.clone());
    if let Some(command) = &spec.command {
        args.extend(command.split_whitespace().map(str::to_string));
    }
    args
}

/// `ps` invocation; `all` includes stopped containers.
fn ps_args(all: bool) -> Vec<String> {
    let mut args = vec!["ps".to_string()];
    if all {
        args.push("-a".to_string());
    }
    args.push("--format".to_string());
    args.push(PS_FORMAT.to_string());
    args
}

/// Parse `ID NAME` lines. A line with a single field is taken as a bare name.
fn parse_ps_output(stdout: &str) -> Vec<WorkerInstance> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let first = fields.next()?;
            Some(match fields.next() {
                Some(name) => WorkerInstance {
                    name: name.to_string(),
                    id: first.to_string(),
                },
                None => WorkerInstance {
                    name: first.to_string(),
                    id: String::new(),
                },
            })
        })
        .collect()
}

fn check_output(action: &str, output: Output) -> BackendResult<String> {
    if !output.status.success() {
        return Err(BackendError::Command {
            action: action.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
