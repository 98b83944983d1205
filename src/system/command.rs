//! Process spawning for remediation and platform queries
//!
//! Every external tool the watchdog invokes goes through [`CommandRunner`], which
//! always carries a deadline.

use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SystemCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run as another user through `sudo`, optionally with extra environment
    pub fn as_user(self, user: &str, env: &[(String, String)]) -> Self {
        let mut wrapped = SystemCommand::new("sudo").args(["-u", user]);
        if !env.is_empty() {
            wrapped = wrapped
                .arg("env")
                .args(env.iter().map(|(k, v)| format!("{k}={v}")));
        }
        wrapped.arg(self.program).args(self.args)
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into an error
    pub fn check(self, command: &SystemCommand) -> Result<CommandOutput> {
        if self.success {
            Ok(self)
        } else {
            Err(WatchdogError::CommandFailed {
                program: command.to_string(),
                status: self
                    .code
                    .map(|c| format!("exit {c}"))
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, failing with `CommandTimeout` past the deadline
    async fn run(&self, command: &SystemCommand, timeout: Duration) -> Result<CommandOutput>;
}

/// Runs commands with `tokio::process`, killing children that outlive the deadline
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &SystemCommand, timeout: Duration) -> Result<CommandOutput> {
        debug!(command = %command, "Running system command");

        let mut child = tokio::process::Command::new(&command.program);
        child
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, child.output()).await {
            Err(_) => {
                warn!(command = %command, timeout_secs = timeout.as_secs(), "Command timed out");
                Err(WatchdogError::CommandTimeout {
                    program: command.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => Err(WatchdogError::Io(e)),
            Ok(Ok(output)) => Ok(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }
}
