//! One-shot espanso commands behind the companion's buttons.
//!
//! Each call runs a single CLI invocation in the foreground and maps its
//! exit code and output onto a [`Report`] or a small typed view.

use super::{Report, StepStatus};
use crate::cli::{CommandExecutor, CommandResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// `espanso service check` exit code for "not registered".
const AUTOSTART_DISABLED_EXIT: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageOp {
    Install,
    Uninstall,
    Update,
}

impl PackageOp {
    fn as_arg(self) -> &'static str {
        match self {
            PackageOp::Install => "install",
            PackageOp::Uninstall => "uninstall",
            PackageOp::Update => "update",
        }
    }

    fn requires_name(self) -> bool {
        !matches!(self, PackageOp::Update)
    }
}

impl FromStr for PackageOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "install" => Ok(PackageOp::Install),
            "uninstall" => Ok(PackageOp::Uninstall),
            "update" => Ok(PackageOp::Update),
            other => Err(format!("Unknown package operation: {}", other)),
        }
    }
}

/// Installed packages as reported by `package list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageListing {
    pub status: StepStatus,
    pub packages: Vec<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    NotFound,
    Error,
}

/// Result of feeding a trigger through `match exec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub status: MatchStatus,
    pub input: String,
    pub output: String,
}

impl MatchOutcome {
    pub fn matched(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}

/// Raw `espanso doctor` output; the exit code is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    pub exit_code: i32,
    pub output: String,
}

pub struct ServiceControl {
    cli: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl ServiceControl {
    pub fn new(cli: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { cli, timeout }
    }

    fn run(&self, args: &[&str]) -> CommandResult {
        self.cli.execute(args, self.timeout, None)
    }

    /// Whether espanso is registered to start with the session.
    ///
    /// Exit 0 is registered, 2 is "not registered" (a valid state), anything
    /// else means the check itself failed.
    pub fn autostart_status(&self) -> Report {
        let result = self.run(&["service", "check"]);
        let detail = result.combined_output();
        match result.exit_code {
            0 => Report::success(or_default(detail, "Auto-start enabled")),
            AUTOSTART_DISABLED_EXIT => Report::warning(or_default(detail, "Auto-start disabled")),
            _ => Report::error(or_default(detail, "Unable to check autostart status")),
        }
    }

    pub fn set_autostart(&self, enable: bool) -> Report {
        let action = if enable { "register" } else { "unregister" };
        info!("Autostart: service {}", action);
        let result = self.run(&["service", action]);
        strict(&result, &format!("Autostart {} completed", action))
    }

    /// Foreground `espanso start`. Failure is a warning: the daemon may
    /// already be up.
    pub fn start(&self) -> Report {
        info!("Requesting espanso start");
        lenient(&self.run(&["start"]), "Espanso start requested")
    }

    pub fn restart(&self) -> Report {
        info!("Requesting espanso restart");
        lenient(&self.run(&["restart"]), "Espanso restart issued")
    }

    pub fn list_packages(&self) -> PackageListing {
        let result = self.run(&["package", "list"]);
        if !result.success() {
            return PackageListing {
                status: StepStatus::Error,
                packages: Vec::new(),
                detail: or_default(result.error_output(), "Unable to list packages"),
            };
        }

        let packages: Vec<String> = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        PackageListing {
            status: StepStatus::Success,
            detail: format!("{} package(s)", packages.len()),
            packages,
        }
    }

    /// `package install|uninstall <name>` or `package update [name]`.
    pub fn package(&self, op: PackageOp, name: Option<&str>) -> Report {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if op.requires_name() && name.is_none() {
            return Report::error(format!("Package name is required for {}", op.as_arg()));
        }

        let mut args = vec!["package", op.as_arg()];
        args.extend(name);
        info!("Running espanso {}", args.join(" "));

        let result = self.run(&args);
        strict(&result, &format!("Command {} completed", args.join(" ")))
    }

    /// Would `text` trigger a match?
    pub fn test_match(&self, text: &str) -> MatchOutcome {
        let result = self.run(&["match", "exec", "-t", text]);
        let stdout = result.stdout.trim();

        let (status, output) = if result.success() && !stdout.is_empty() {
            (MatchStatus::Matched, stdout)
        } else if result.success() {
            (MatchStatus::NotFound, or_str(result.stderr.trim(), "No match output returned"))
        } else {
            (MatchStatus::Error, or_str(result.error_output(), "No match output returned"))
        };

        MatchOutcome {
            status,
            input: text.to_string(),
            output: output.to_string(),
        }
    }

    /// The last `lines` lines of `espanso log`.
    pub fn logs(&self, lines: usize) -> Vec<String> {
        let result = self.run(&["log"]);
        let all: Vec<&str> = result.stdout.trim().lines().collect();
        let skip = all.len().saturating_sub(lines);
        all[skip..].iter().map(|l| l.to_string()).collect()
    }

    pub fn doctor(&self) -> DoctorReport {
        let result = self.run(&["doctor"]);
        DoctorReport {
            exit_code: result.exit_code,
            output: result.combined_output().to_string(),
        }
    }
}

fn or_str<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    or_str(value, fallback).to_string()
}

/// Non-zero exit is an error.
fn strict(result: &CommandResult, fallback: &str) -> Report {
    let detail = or_default(result.combined_output(), fallback);
    if result.success() {
        Report::success(detail)
    } else {
        Report::error(detail)
    }
}

/// Non-zero exit is only a warning.
fn lenient(result: &CommandResult, fallback: &str) -> Report {
    let detail = or_default(result.combined_output(), fallback);
    if result.success() {
        Report::success(detail)
    } else {
        Report::warning(detail)
    }
}
