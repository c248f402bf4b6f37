//! Host shell execution for `!`-prefixed lines.
//!
//! Lines run one at a time so later commands observe the effects of earlier
//! ones. Package installs are routed to the session interpreter; everything
//! else passes the denylist gate and runs through the host shell.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use wait_timeout::ChildExt;

use crate::command_safety::{
    BLOCKED_MESSAGE, Denylist, PackageManager, SafetyLevel, analyze_command,
};
use crate::error::ShellError;
use crate::utils::{MAX_OUTPUT_SIZE, isolate_process_group, kill_process_tree, truncate_output};

/// Prefix used on failures of plain shell commands.
const SHELL_ERROR_LABEL: &str = "SHELL COMMAND ERROR";

/// Status of a finished shell line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShellStatus {
    Completed,
    Failed,
    TimedOut,
    Blocked,
}

/// How a line was dispatched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandKind {
    Shell,
    PipInstall,
    CondaInstall,
}

impl CommandKind {
    fn error_label(self) -> &'static str {
        match self {
            Self::Shell => SHELL_ERROR_LABEL,
            Self::PipInstall => PackageManager::Pip.error_label(),
            Self::CondaInstall => PackageManager::Conda.error_label(),
        }
    }
}

/// Result of one shell line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellOutcome {
    pub command: String,
    pub kind: CommandKind,
    pub status: ShellStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Set when the line ran into a timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ShellOutcome {
    fn blocked(command: &str) -> Self {
        Self {
            command: command.to_string(),
            kind: CommandKind::Shell,
            status: ShellStatus::Blocked,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            timeout_secs: None,
        }
    }

    fn empty(command: &str) -> Self {
        Self {
            status: ShellStatus::Completed,
            ..Self::blocked(command)
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status == ShellStatus::Completed
    }

    /// Text reported to the agent for this line.
    #[must_use]
    pub fn render(&self) -> String {
        let label = self.kind.error_label();
        match self.status {
            ShellStatus::Completed => format!("{}{}", self.stdout, self.stderr),
            ShellStatus::Blocked => BLOCKED_MESSAGE.to_string(),
            ShellStatus::Failed => format!(
                "{label}:\n{}\n{}\nReturn code: {}",
                self.stdout,
                self.stderr,
                self.exit_code.unwrap_or(-1)
            ),
            ShellStatus::TimedOut => format!(
                "{label}:\nCommand timed out after {}s\n{}\n{}",
                self.timeout_secs.unwrap_or_default(),
                self.stdout,
                self.stderr
            ),
        }
    }
}

/// Render a line that could not be started at all.
#[must_use]
pub fn render_failure(command: &str, err: &ShellError) -> String {
    let kind = match crate::command_safety::package_install(command) {
        Some((PackageManager::Pip, _)) => CommandKind::PipInstall,
        Some((PackageManager::Conda, _)) => CommandKind::CondaInstall,
        None => CommandKind::Shell,
    };
    format!("{}:\n{err}", kind.error_label())
}

/// Runs shell lines for one session.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    working_dir: PathBuf,
    python: PathBuf,
    denylist: Denylist,
    shell_timeout: Option<Duration>,
    install_timeout: Option<Duration>,
    max_output: usize,
}

impl ShellRunner {
    /// Create a runner with the built-in denylist and no shell timeout.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, python: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            python: python.into(),
            denylist: Denylist::default(),
            shell_timeout: None,
            install_timeout: Some(Duration::from_secs(600)),
            max_output: MAX_OUTPUT_SIZE,
        }
    }

    #[must_use]
    pub fn with_denylist(mut self, denylist: Denylist) -> Self {
        self.denylist = denylist;
        self
    }

    #[must_use]
    pub fn with_shell_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shell_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_install_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.install_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }


    /// Run a single shell line.
    pub fn run(&self, command: &str) -> Result<ShellOutcome, ShellError> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(ShellOutcome::empty(command));
        }

        let analysis = analyze_command(command, &self.denylist);
        match analysis.level {
            SafetyLevel::Blocked { matched } => {
                tracing::warn!(command, ?matched, "Blocked dangerous shell command");
                Ok(ShellOutcome::blocked(command))
            }
            SafetyLevel::PackageInstall {
                manager: PackageManager::Pip,
                args,
            } => {
                let mut cmd = Command::new(&self.python);
                cmd.args(["-m", "pip", "install"]).args(&args);
                tracing::info!(
                    command,
                    rewritten = %rewritten_display(&self.python, &args),
                    "Routing pip install to session interpreter"
                );
                self.spawn_and_wait(cmd, command, CommandKind::PipInstall, self.install_timeout)
            }
            SafetyLevel::PackageInstall {
                manager: PackageManager::Conda,
                ..
            } => self.spawn_and_wait(
                host_shell(command),
                command,
                CommandKind::CondaInstall,
                self.install_timeout,
            ),
            SafetyLevel::Allowed => self.spawn_and_wait(
                host_shell(command),
                command,
                CommandKind::Shell,
                self.shell_timeout,
            ),
        }
    }

    fn spawn_and_wait(
        &self,
        mut cmd: Command,
        command: &str,
        kind: CommandKind,
        timeout: Option<Duration>,
    ) -> Result<ShellOutcome, ShellError> {
        let started = Instant::now();
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| ShellError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdout_thread = drain(&mut child, Stream::Stdout)
            .ok_or_else(|| ShellError::Capture {
                command: command.to_string(),
            })?;
        let stderr_thread = drain(&mut child, Stream::Stderr)
            .ok_or_else(|| ShellError::Capture {
                command: command.to_string(),
            })?;

        let waited = wait(&mut child, timeout).map_err(|source| ShellError::Wait {
            command: command.to_string(),
            source,
        })?;

        let (status, exit_code) = match waited {
            Some(status) => (
                if status.success() {
                    ShellStatus::Completed
                } else {
                    ShellStatus::Failed
                },
                status.code(),
            ),
            None => {
                tracing::warn!(command, ?timeout, "Shell command timed out; killing");
                kill_process_tree(&mut child);
                let code = child.wait().ok().and_then(|s| s.code());
                (ShellStatus::TimedOut, code)
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(command, ?status, ?exit_code, duration_ms, "Shell command finished");

        Ok(ShellOutcome {
            command: command.to_string(),
            kind,
            status,
            exit_code,
            stdout: truncate_output(&String::from_utf8_lossy(&stdout), self.max_output),
            stderr: truncate_output(&String::from_utf8_lossy(&stderr), self.max_output),
            duration_ms,
            timeout_secs: if status == ShellStatus::TimedOut {
                timeout.map(|t| t.as_secs())
            } else {
                None
            },
        })
    }
}

enum Stream {
    Stdout,
    Stderr,
}

fn drain(child: &mut Child, stream: Stream) -> Option<JoinHandle<Vec<u8>>> {
    let reader: Box<dyn Read + Send> = match stream {
        Stream::Stdout => Box::new(child.stdout.take()?),
        Stream::Stderr => Box::new(child.stderr.take()?),
    };
    Some(std::thread::spawn(move || {
        let mut reader = reader;
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    }))
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<Option<ExitStatus>> {
    match timeout {
        Some(timeout) => child.wait_timeout(timeout),
        None => child.wait().map(Some),
    }
}

#[cfg(windows)]
fn host_shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn host_shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

fn rewritten_display(python: &Path, args: &[String]) -> String {
    let python = python.to_string_lossy();
    let argv = [python.as_ref(), "-m", "pip", "install"]
        .into_iter()
        .chain(args.iter().map(String::as_str));
    shlex::try_join(argv).unwrap_or_else(|_| format!("{python} -m pip install {}", args.join(" ")))
}
