//! External command invocation.

use crate::errors::ReleaseflowError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const REDACTED: &str = "***";

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Program to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Upper bound on the runtime.
    pub timeout: Option<Duration>,
    secret_args: BTreeSet<usize>,
}

impl CommandInvocation {
    /// Creates an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            secret_args: BTreeSet::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Appends an argument that must never be logged.
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.insert(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the timeout, if any.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if any argument contains `needle`.
    #[must_use]
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a.contains(needle))
    }

    /// Returns the argument following `flag`, if present.
    #[must_use]
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Returns the arguments with secrets replaced.
    #[must_use]
    pub fn redacted_args(&self) -> Vec<String> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if self.secret_args.contains(&i) {
                    REDACTED.to_string()
                } else {
                    a.clone()
                }
            })
            .collect()
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.redacted_args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a finished command reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or timed out.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the command hit its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    /// A successful, silent output.
    #[must_use]
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A successful output with stdout.
    #[must_use]
    pub fn success_with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::success()
        }
    }

    /// A failed output with an exit code and stderr.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// An output for a command that ran past its timeout.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    /// Returns true for a zero exit status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// One-line description of a failure for stage errors.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let status = self
            .exit_code
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
        match self.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(line) => format!("{status}: {}", line.trim()),
            None => status,
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        }
    }
}

/// Runs external commands on behalf of stages.
///
/// Stages only see this trait, so tests can script every tool the release
/// pipeline drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion.
    ///
    /// A non-zero exit or a timeout is a normal [`CommandOutput`]; only a
    /// failure to start the program is an error.
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ReleaseflowError>;
}

/// Command runner backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    /// Creates a process runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ReleaseflowError> {
        debug!(command = %invocation, cwd = ?invocation.cwd, "Running command");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(ref cwd) = invocation.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let child = command.output();
        let output = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, child).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command = %invocation, timeout_secs = limit.as_secs(), "Command timed out");
                    return Ok(CommandOutput::timed_out());
                }
            },
            None => child.await,
        }
        .map_err(|source| ReleaseflowError::CommandSpawn {
            program: invocation.program.clone(),
            source,
        })?;

        Ok(output.into())
    }
}
