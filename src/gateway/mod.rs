//! External process gateway.
//!
//! Every subprocess (control-plane CLI, container engine) goes through a
//! `CommandRunner`, so steps can be exercised against a scripted runner in
//! tests. Invocations are blocking: the caller waits for exit and only sees
//! the exit status and captured output.
pub mod engine;
pub mod registry;
pub mod snow;

use crate::error::DeployError;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

pub use engine::ContainerEngine;
pub use snow::ControlPlane;

/// How a subprocess is wired to the operator's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Io {
    /// Capture stdout/stderr silently.
    Capture,
    /// Capture, then echo the captured output once the process exits.
    Forward,
    /// Inherit all stdio (long-running builds, interactive shells).
    Inherit,
}

/// A resolved executable plus any fixed leading arguments (package runners).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub label: String,
    pub path: PathBuf,
    pub prefix: Vec<String>,
}

impl Program {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            prefix: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: &[&str]) -> Self {
        self.prefix = prefix.iter().map(|arg| arg.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: Program,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
    /// Fed on stdin; used for statements that carry secret material.
    pub stdin: Option<String>,
    pub io: Io,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

pub trait CommandRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput, DeployError>;
}

/// Runs requests as real child processes.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput, DeployError> {
        let label = &request.program.label;
        let spawn_err = |source: std::io::Error| DeployError::Spawn {
            program: label.clone(),
            source,
        };
        tracing::debug!(
            program = %label,
            args = %request.args.join(" "),
            stdin_bytes = request.stdin.as_ref().map_or(0, String::len),
            "invoke"
        );

        let start = Instant::now();
        let mut command = Command::new(&request.program.path);
        command
            .args(&request.program.prefix)
            .args(&request.args)
            .envs(&request.envs);

        let output = match request.io {
            Io::Inherit => {
                let status = command.status().map_err(spawn_err)?;
                CommandOutput {
                    success: status.success(),
                    code: status.code(),
                    ..CommandOutput::default()
                }
            }
            Io::Capture | Io::Forward => {
                let stdin = if request.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                };
                let mut child = command
                    .stdin(stdin)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(spawn_err)?;
                if let (Some(input), Some(mut pipe)) = (&request.stdin, child.stdin.take()) {
                    pipe.write_all(input.as_bytes()).map_err(spawn_err)?;
                }
                let output = child.wait_with_output().map_err(spawn_err)?;
                CommandOutput {
                    success: output.status.success(),
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
        };

        tracing::debug!(
            program = %label,
            elapsed_ms = start.elapsed().as_millis() as u64,
            code = ?output.code,
            stdout_bytes = output.stdout.len(),
            "command complete"
        );
        if request.io == Io::Forward {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Conflict,
    Other,
}

/// Best-effort classification of failure text.
///
/// The control plane exposes no structured error codes, so this is the one
/// place that matches on message wording.
pub fn classify_failure(text: &str) -> FailureKind {
    if text.to_ascii_lowercase().contains("already exists") {
        FailureKind::Conflict
    } else {
        FailureKind::Other
    }
}

/// Convert a non-zero exit into the matching error kind.
pub(crate) fn failure_error(program: &str, output: &CommandOutput) -> DeployError {
    let detail = failure_detail(output);
    let combined = format!("{}\n{}", output.stderr, output.stdout);
    match classify_failure(&combined) {
        FailureKind::Conflict => DeployError::Conflict {
            program: program.to_string(),
            detail,
        },
        FailureKind::Other => DeployError::ExternalCommand {
            program: program.to_string(),
            status: output
                .code
                .map_or_else(|| "terminated by signal".to_string(), |code| format!("exit {code}")),
            detail,
        },
    }
}

fn failure_detail(output: &CommandOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    let line = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if line.is_empty() {
        "see output above".to_string()
    } else {
        line
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_is_a_conflict_regardless_of_case() {
        assert_eq!(
            classify_failure("002002 (42710): Object 'JOB' ALREADY EXISTS."),
            FailureKind::Conflict
        );
        assert_eq!(classify_failure("permission denied"), FailureKind::Other);
    }

    #[test]
    fn failure_error_keeps_first_lines_and_status() {
        let output = CommandOutput::failed(3, "boom\n\n  detail line \n");
        match failure_error("snow", &output) {
            DeployError::ExternalCommand {
                program,
                status,
                detail,
            } => {
                assert_eq!(program, "snow");
                assert_eq!(status, "exit 3");
                assert_eq!(detail, "boom | detail line");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let conflict = CommandOutput::failed(1, "Service JOB already exists");
        assert!(failure_error("snow", &conflict).is_conflict());
    }
}
