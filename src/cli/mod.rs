//! Invocation of the espanso command-line interface.
//!
//! Everything above this module talks to espanso through the
//! [`CommandExecutor`] trait. The real implementation, [`CliRunner`],
//! resolves the executable, applies timeouts and folds every operational
//! failure (missing binary, spawn error, timeout) into a [`CommandResult`]
//! with exit code 1, so call sites never branch on errors for these cases.

mod resolve;
mod runner;

pub use resolve::{
    find_in_path, needs_shell, normalize_command, quote_cmd, quote_posix, resolve_executable,
    resolve_with, shell_command_line, DEFAULT_EXECUTABLE, ENV_OVERRIDE, KNOWN_NAMES,
};
pub use runner::{run_program, CliRunner};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Child;
use std::time::Duration;

/// Default timeout for foreground CLI calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for `--version` / `status` probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// A failed invocation described only by a message on stderr.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(1, String::new(), message)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, or trimmed stderr when stdout is blank.
    pub fn combined_output(&self) -> &str {
        let out = self.stdout.trim();
        if out.is_empty() {
            self.stderr.trim()
        } else {
            out
        }
    }

    /// Trimmed stderr, or trimmed stdout when stderr is blank.
    pub fn error_output(&self) -> &str {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim()
        } else {
            err
        }
    }

    /// Espanso reports a live daemon as free-form text containing "running".
    ///
    /// The output format is not contractual, so this stays a case-insensitive
    /// substring match on exit code 0.
    pub fn reports_running(&self) -> bool {
        self.success() && self.combined_output().to_lowercase().contains("running")
    }

    /// Copy with surrounding whitespace stripped from both streams.
    pub fn trimmed(&self) -> Self {
        Self::new(self.exit_code, self.stdout.trim(), self.stderr.trim())
    }
}

/// A process started without waiting for it.
///
/// Stdout and stderr are piped to background readers that log each line,
/// so the process keeps running whether or not this handle is kept.
#[derive(Debug)]
pub struct DetachedProcess {
    child: Option<Child>,
    pid: u32,
}

impl DetachedProcess {
    pub fn from_child(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Handle without an OS process, for executors that fake spawning.
    pub fn untracked(pid: u32) -> Self {
        Self { child: None, pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code if the process has already finished.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(1)),
            _ => None,
        }
    }
}

/// Seam over the espanso CLI so the handshake and control layers can be
/// driven by fakes in tests.
pub trait CommandExecutor: Send + Sync {
    /// Run a subcommand and wait for it, up to `timeout`.
    fn execute(&self, args: &[&str], timeout: Duration, cwd: Option<&Path>) -> CommandResult;

    /// Start a subcommand and return as soon as it is spawned.
    fn execute_detached(&self, args: &[&str], cwd: Option<&Path>) -> Result<DetachedProcess>;
}
