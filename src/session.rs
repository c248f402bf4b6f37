//! The interactive execution session.
//!
//! A session owns the shell runner, the evaluator (and through it the
//! namespace), the submission history and the auto-import table. `execute`
//! never fails: every problem is folded into the returned observation.
//! `execute_detailed` keeps failures typed for callers that need them.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command_safety::Denylist;
use crate::error::{SessionError, WorkerError};
use crate::evaluator::{Evaluation, Evaluator, EvaluatorConfig};
use crate::namespace::{AutoImport, DEFAULT_SEED_MODULES, NamespaceSnapshot, Value, is_identifier};
use crate::normalize::strip_code_fence;
use crate::observation;
use crate::partition::{Partition, partition};
use crate::shell::{ShellOutcome, ShellRunner, render_failure};
use crate::utils::MAX_OUTPUT_SIZE;

/// Everything needed to construct a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub working_dir: PathBuf,
    pub python: PathBuf,
    pub denylist: Denylist,
    pub shell_timeout: Option<Duration>,
    pub install_timeout: Option<Duration>,
    pub exec_timeout: Option<Duration>,
    pub max_output: usize,
    pub auto_imports: Vec<AutoImport>,
    pub seed_modules: Vec<String>,
}

impl SessionSettings {
    /// Defaults: built-in denylist and auto-imports, 600s install timeout,
    /// no shell or code timeout.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, python: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            python: python.into(),
            denylist: Denylist::default(),
            shell_timeout: None,
            install_timeout: Some(Duration::from_secs(600)),
            exec_timeout: None,
            max_output: MAX_OUTPUT_SIZE,
            auto_imports: AutoImport::defaults(),
            seed_modules: DEFAULT_SEED_MODULES.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

/// One submitted fragment, after fence stripping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub code: String,
    pub submitted_at: DateTime<Utc>,
}

/// What happened to one shell line.
#[derive(Debug, Clone)]
pub struct ShellLine {
    pub command: String,
    /// Text reported for the line.
    pub output: String,
    /// `None` when the command could not be started.
    pub outcome: Option<ShellOutcome>,
}

/// Full record of one `execute` call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub raw: String,
    pub cleaned: String,
    pub partition: Partition,
    pub shell: Vec<ShellLine>,
    /// `None` when there was no code to evaluate.
    pub evaluation: Option<Evaluation>,
}

impl Invocation {
    /// Render the observation text.
    #[must_use]
    pub fn observation(&self) -> String {
        let shell = observation::shell_section(
            self.shell
                .iter()
                .map(|line| (line.command.as_str(), line.output.as_str())),
        );
        let python = self
            .evaluation
            .as_ref()
            .and_then(|eval| observation::python_section(&eval.stdout_with_echo(), &eval.stderr));
        observation::assemble([shell, python])
    }
}

/// Persistent notebook-like execution session.
#[derive(Debug)]
pub struct Session {
    shell: ShellRunner,
    evaluator: Evaluator,
    history: Vec<HistoryEntry>,
    auto_imports: Vec<AutoImport>,
}

/// Session shared between tools.
pub type SharedSession = Arc<Mutex<Session>>;

impl Session {
    #[must_use]
    pub fn new(settings: SessionSettings) -> Self {
        let shell = ShellRunner::new(&settings.working_dir, &settings.python)
            .with_denylist(settings.denylist)
            .with_shell_timeout(settings.shell_timeout)
            .with_install_timeout(settings.install_timeout)
            .with_max_output(settings.max_output);

        let evaluator = Evaluator::new(EvaluatorConfig {
            python: settings.python,
            working_dir: settings.working_dir,
            exec_timeout: settings.exec_timeout,
            seed_modules: settings.seed_modules,
        });

        Self {
            shell,
            evaluator,
            history: Vec::new(),
            auto_imports: settings.auto_imports,
        }
    }

    /// Wrap the session for use from several tools.
    #[must_use]
    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Execute a submission and return the observation text.
    pub fn execute(&mut self, raw: &str) -> String {
        match self.execute_detailed(raw) {
            Ok(invocation) => invocation.observation(),
            Err(err) => error_observation(&err),
        }
    }

    /// Execute a submission and return the structured record.
    ///
    /// A worker that dies or times out mid-execution is still `Ok`, with the
    /// loss recorded in the evaluation. Panics are caught and returned as
    /// [`SessionError::Panicked`].
    pub fn execute_detailed(&mut self, raw: &str) -> Result<Invocation, SessionError> {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.run(raw))) {
            Ok(result) => result,
            Err(payload) => Err(SessionError::Panicked(panic_message(payload.as_ref()))),
        };
        if let Err(err) = &result {
            tracing::error!(error = %err, category = err.category(), "Execution failed");
        }
        result
    }

    fn run(&mut self, raw: &str) -> Result<Invocation, SessionError> {
        let cleaned = strip_code_fence(raw).to_string();
        self.history.push(HistoryEntry {
            code: cleaned.clone(),
            submitted_at: Utc::now(),
        });

        let parts = partition(&cleaned);
        tracing::debug!(
            shell_lines = parts.shell_lines.len(),
            has_code = parts.has_code(),
            "Executing submission"
        );

        let shell = parts
            .shell_lines
            .iter()
            .map(|command| self.run_shell_line(command))
            .collect();

        let evaluation = if parts.has_code() {
            Some(self.evaluator.evaluate(&parts.code, &self.auto_imports)?)
        } else {
            None
        };

        Ok(Invocation {
            raw: raw.to_string(),
            cleaned,
            partition: parts,
            shell,
            evaluation,
        })
    }

    fn run_shell_line(&self, command: &str) -> ShellLine {
        match self.shell.run(command) {
            Ok(outcome) => ShellLine {
                command: command.to_string(),
                output: outcome.render(),
                outcome: Some(outcome),
            },
            Err(err) => {
                tracing::warn!(command, error = %err, "Shell command failed to start");
                ShellLine {
                    command: command.to_string(),
                    output: render_failure(command, &err),
                    outcome: None,
                }
            }
        }
    }

    /// Discard the namespace and history and reseed the defaults.
    pub fn reset(&mut self) -> String {
        self.evaluator.reset();
        self.history.clear();
        tracing::info!("Session reset");
        observation::RESET_CONFIRMATION.to_string()
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.shell.working_dir()
    }

    /// Whether the worker holding the namespace is currently running.
    pub fn is_running(&mut self) -> bool {
        self.evaluator.is_running()
    }

    /// User-visible bindings, dunder names excluded.
    pub fn snapshot(&mut self) -> Result<NamespaceSnapshot, SessionError> {
        Ok(self.evaluator.names()?)
    }

    pub fn names(&mut self) -> Result<Vec<String>, SessionError> {
        Ok(self.snapshot()?.names().map(str::to_string).collect())
    }

    pub fn get(&mut self, name: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.evaluator.get(name)?)
    }

    /// Bind a scalar value into the namespace.
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SessionError> {
        let value = value.into();
        let invalid = |reason: &str| SessionError::InvalidBinding {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if !is_identifier(name) {
            return Err(invalid("not a valid identifier"));
        }
        if !value.is_bindable() {
            return Err(invalid("opaque values cannot be bound from the host"));
        }

        match self.evaluator.bind(name, &value) {
            Ok(()) => Ok(()),
            Err(WorkerError::Rejected(reason)) => Err(invalid(&reason)),
            Err(err) => Err(err.into()),
        }
    }

    /// Stop the worker now instead of on drop.
    pub fn shutdown(&mut self) {
        self.evaluator.shutdown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.evaluator.shutdown();
    }
}

/// Observation text for a failed execution.
#[must_use]
pub fn error_observation(err: &SessionError) -> String {
    observation::execution_error(&err.to_string(), &error_detail(err))
}

fn error_detail(err: &dyn std::error::Error) -> String {
    let mut lines = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("Caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
