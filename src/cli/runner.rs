//! Process execution with timeouts, failures folded into results.

use super::resolve::{needs_shell, normalize_command, resolve_executable, shell_command_line};
use super::{CommandExecutor, CommandResult, DetachedProcess};
use crate::error::{CompanionError, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for the pipes to close once the child is gone. A
/// grandchild (a daemon, or the process behind `sh -c`) can hold them open
/// indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs the real espanso executable.
#[derive(Debug, Clone)]
pub struct CliRunner {
    executable: String,
}

impl CliRunner {
    /// Resolve the executable now (`ESPANSO_CLI`, configured path, `PATH`).
    pub fn new(configured: Option<&str>) -> Self {
        let executable = resolve_executable(configured);
        debug!("Using espanso executable: {}", executable);
        Self { executable }
    }

    /// Use an exact executable path, skipping resolution.
    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    fn build(&self, args: &[&str], cwd: Option<&Path>) -> (Command, String) {
        let tokens = normalize_command(&self.executable, args);
        let command_line = tokens.join(" ");

        let mut command = if needs_shell(&self.executable) {
            shell_command(&shell_command_line(&tokens))
        } else {
            let mut command = Command::new(&tokens[0]);
            command.args(&tokens[1..]);
            command
        };

        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        (command, command_line)
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut command = Command::new("cmd");
    command.arg("/C").raw_arg(line);
    command
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

impl CommandExecutor for CliRunner {
    fn execute(&self, args: &[&str], timeout: Duration, cwd: Option<&Path>) -> CommandResult {
        let (command, command_line) = self.build(args, cwd);
        run_with_timeout(command, timeout, &command_line)
    }

    fn execute_detached(&self, args: &[&str], cwd: Option<&Path>) -> Result<DetachedProcess> {
        let (mut command, command_line) = self.build(args, cwd);
        debug!("Spawning detached: {}", command_line);

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&command_line, e))?;

        let pid = child.id();
        debug!("Detached process started (PID: {})", pid);

        // The readers own the pipes, so dropping the handle never closes
        // them under a process that is still writing.
        forward(child.stdout.take(), pid, "stdout");
        forward(child.stderr.take(), pid, "stderr");
        Ok(DetachedProcess::from_child(child))
    }
}

/// Log a detached process's output line by line until it closes the pipe.
fn forward<R: Read + Send + 'static>(pipe: Option<R>, pid: u32, stream: &'static str) {
    if let Some(pipe) = pipe {
        thread::spawn(move || {
            for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
                debug!("[{} {}] {}", pid, stream, line);
            }
        });
    }
}

/// Run an arbitrary program (the installer, for instance) with the same
/// failure-as-data semantics as the espanso runner.
pub fn run_program(
    program: &str,
    args: &[&str],
    timeout: Duration,
    cwd: Option<&Path>,
) -> CommandResult {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    run_with_timeout(command, timeout, &command_line)
}

fn spawn_error(command_line: &str, error: std::io::Error) -> CompanionError {
    if error.kind() == ErrorKind::NotFound {
        CompanionError::Unavailable(format!("{}: executable not found", command_line))
    } else {
        CompanionError::Unavailable(format!("failed to launch {}: {}", command_line, error))
    }
}

fn run_with_timeout(mut command: Command, timeout: Duration, command_line: &str) -> CommandResult {
    debug!("Running: {} (timeout {:?})", command_line, timeout);

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let error = spawn_error(command_line, e);
            warn!("{}", error);
            return CommandResult::failure(error.to_string());
        }
    };

    // Drain both pipes concurrently so a chatty process cannot stall on a
    // full pipe while we poll for exit.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) if started.elapsed() >= timeout => {
                break Err(kill(&mut child, command_line, timeout))
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                break Err(CompanionError::Unavailable(format!(
                    "failed while waiting for {}: {}",
                    command_line, e
                )));
            }
        }
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout = collect(stdout, deadline);
    let stderr = collect(stderr, deadline);

    match status {
        Ok(status) => {
            let exit_code = status.code().unwrap_or(1);
            debug!("{} exited with {}", command_line, exit_code);
            CommandResult::new(exit_code, stdout, stderr)
        }
        Err(error) => {
            warn!("{}", error);
            CommandResult::new(1, stdout, error.to_string())
        }
    }
}

fn kill(child: &mut Child, command_line: &str, timeout: Duration) -> CompanionError {
    let _ = child.kill();
    let _ = child.wait();
    CompanionError::Timeout {
        command: command_line.to_string(),
        timeout,
    }
}

/// Output read so far from one pipe, plus a signal for end of stream.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Drain> {
    pipe.map(|mut reader| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = buf.clone();
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend_from_slice(&chunk[..n]),
                }
            }
            let _ = tx.send(());
        });
        Drain { buf, done }
    })
}

/// Whatever the pipe produced, waiting for end of stream no later than
/// `deadline`. The reader thread is left behind if a grandchild keeps the
/// pipe open.
fn collect(drain: Option<Drain>, deadline: Instant) -> String {
    let Some(drain) = drain else {
        return String::new();
    };
    let _ = drain
        .done
        .recv_timeout(deadline.saturating_duration_since(Instant::now()));
    let buf = std::mem::take(
        &mut *drain
            .buf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    );
    String::from_utf8_lossy(&buf).into_owned()
}
