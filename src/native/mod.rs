//! Child-process orchestration for the PostgreSQL command line tools.
//!
//! Tools are spawned directly (never through a shell) with an argv built
//! from [`params::CheckedPgParams`]. The password travels through the
//! child's environment only.

pub mod params;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;

pub use params::{check_param, check_port, CheckedPgParams};

const STDERR_CAPTURE_BYTES: usize = 64 * 1024;
const STDERR_SUMMARY_CHARS: usize = 2_000;

#[derive(Debug, Error)]
pub enum NativeToolError {
    #[error("invalid connection parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("{tool} did not finish within {timeout_ms} ms")]
    Timeout { tool: &'static str, timeout_ms: u64 },
    #[error("i/o error while running {tool}: {source}")]
    Io {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl NativeToolError {
    pub fn tool(&self) -> &'static str {
        match self {
            NativeToolError::InvalidParameter { .. } => "parameters",
            NativeToolError::Spawn { tool, .. }
            | NativeToolError::Failed { tool, .. }
            | NativeToolError::Timeout { tool, .. }
            | NativeToolError::Io { tool, .. } => tool,
        }
    }

    /// Replace every occurrence of `path` in captured stderr with `label`.
    /// Tools echo their `-f` argument, which is a server path.
    pub fn redact_path(self, path: &Path, label: &str) -> Self {
        match self {
            NativeToolError::Failed { tool, status, stderr } => {
                let needle = path.to_string_lossy();
                let stderr = if needle.is_empty() {
                    stderr
                } else {
                    stderr.replace(needle.as_ref(), label)
                };
                NativeToolError::Failed { tool, status, stderr }
            }
            other => other,
        }
    }
}

/// One fully specified tool run.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Short name used in errors and logs (`pg_dump`, `psql`).
    pub tool: &'static str,
    /// Program to execute; resolved through `PATH` when not absolute.
    pub program: String,
    pub args: Vec<String>,
    pub password: Option<String>,
    /// Hard wall-clock bound. The child is killed when it elapses.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub elapsed: Duration,
}

pub async fn run_tool(invocation: ToolInvocation) -> Result<ToolOutput, NativeToolError> {
    let ToolInvocation {
        tool,
        program,
        args,
        password,
        timeout,
    } = invocation;

    let mut command = Command::new(&program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(password) = password {
        command.env("PGPASSWORD", password);
    }

    let started = Instant::now();
    tracing::info!(
        target: "stoner_backup",
        event = "native_tool_started",
        tool,
        timeout_ms = timeout.map(|t| t.as_millis() as u64)
    );

    let mut child = command
        .spawn()
        .map_err(|source| NativeToolError::Spawn { tool, source })?;
    let stderr_task: Option<JoinHandle<String>> =
        child.stderr.take().map(|stderr| tokio::spawn(drain_stderr(stderr)));

    let status: ExitStatus = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => waited.map_err(|source| NativeToolError::Io { tool, source })?,
            Err(_) => {
                if let Err(err) = child.kill().await {
                    tracing::warn!(
                        target: "stoner_backup",
                        event = "native_tool_kill_failed",
                        tool,
                        error = %err
                    );
                }
                if let Some(task) = stderr_task {
                    task.abort();
                }
                let timeout_ms = limit.as_millis() as u64;
                tracing::warn!(
                    target: "stoner_backup",
                    event = "native_tool_timeout",
                    tool,
                    timeout_ms
                );
                return Err(NativeToolError::Timeout { tool, timeout_ms });
            }
        },
        None => child
            .wait()
            .await
            .map_err(|source| NativeToolError::Io { tool, source })?,
    };

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let elapsed = started.elapsed();

    if !status.success() {
        let status = describe_status(&status);
        tracing::warn!(
            target: "stoner_backup",
            event = "native_tool_failed",
            tool,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64
        );
        return Err(NativeToolError::Failed {
            tool,
            status,
            stderr: summarize_stderr(&stderr),
        });
    }

    tracing::info!(
        target: "stoner_backup",
        event = "native_tool_finished",
        tool,
        elapsed_ms = elapsed.as_millis() as u64
    );
    Ok(ToolOutput { elapsed })
}

async fn drain_stderr(mut stderr: ChildStderr) -> String {
    let mut kept = Vec::new();
    let mut buf = [0_u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = STDERR_CAPTURE_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

/// Last part of stderr, trimmed to a bounded number of characters.
pub(crate) fn summarize_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_SUMMARY_CHARS {
        if trimmed.is_empty() {
            return "no diagnostic output".to_string();
        }
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - STDERR_SUMMARY_CHARS).collect();
    format!("...{tail}")
}
