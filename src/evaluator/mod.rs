//! Code evaluator: parse and rewrite on the host, execute in the worker.
//!
//! The worker is started lazily on first use and replaced whenever it dies
//! or times out; a replacement starts from freshly seeded defaults.

pub mod rewrite;
pub mod worker;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EvalError, WorkerError};
use crate::namespace::{AutoImport, DEFAULT_SEED_MODULES, NamespaceSnapshot, Value};
use crate::observation;

pub use rewrite::{Prepared, prepare};
pub use worker::{ExecReply, LastValue, Worker};

/// Settings for the evaluator and its worker.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub python: PathBuf,
    pub working_dir: PathBuf,
    /// Bound on one worker round trip; `None` waits indefinitely.
    pub exec_timeout: Option<Duration>,
    pub seed_modules: Vec<String>,
}

impl EvaluatorConfig {
    #[must_use]
    pub fn new(python: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            working_dir: working_dir.into(),
            exec_timeout: None,
            seed_modules: DEFAULT_SEED_MODULES.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

/// Outcome of evaluating one code fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub stdout: String,
    pub stderr: String,
    pub last: Option<LastValue>,
    /// Whether the host parser accepted the code.
    pub parsed: bool,
    /// Whether a trailing expression was rewritten for echo.
    pub rewritten: bool,
    /// Whether the worker was discarded, taking the namespace with it.
    pub worker_lost: bool,
}

impl Evaluation {
    /// Captured stdout with the last expression echo appended.
    #[must_use]
    pub fn stdout_with_echo(&self) -> String {
        match &self.last {
            Some(last) => format!("{}{}", self.stdout, observation::last_expression(last)),
            None => self.stdout.clone(),
        }
    }

    fn lost(err: &EvalError, prepared: &Prepared) -> Self {
        Self {
            stderr: err.to_string(),
            parsed: prepared.parsed,
            rewritten: prepared.capture.is_some(),
            worker_lost: true,
            ..Self::default()
        }
    }
}

/// Owns the worker and drives the parse, rewrite, execute and capture steps.
#[derive(Debug)]
pub struct Evaluator {
    config: EvaluatorConfig,
    worker: Option<Worker>,
}

impl Evaluator {
    #[must_use]
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }

    /// Whether a live worker currently holds the namespace.
    pub fn is_running(&mut self) -> bool {
        self.worker.as_mut().is_some_and(Worker::is_alive)
    }

    /// Evaluate `code` against the persistent namespace.
    ///
    /// A timeout or a worker that dies mid-execution is reported in the
    /// returned stderr rather than as an error; the worker is discarded and
    /// the next call starts a fresh one. Only failing to start a worker is
    /// an error.
    pub fn evaluate(&mut self, code: &str, auto_imports: &[AutoImport]) -> Result<Evaluation, EvalError> {
        let prepared = prepare(code);
        let timeout = self.config.exec_timeout;

        let result = self
            .worker()?
            .exec(&prepared.code, prepared.capture.as_deref(), auto_imports, timeout);

        match result {
            Ok(reply) => Ok(Evaluation {
                stdout: reply.stdout,
                stderr: reply.stderr,
                last: reply.last,
                parsed: prepared.parsed,
                rewritten: prepared.capture.is_some(),
                worker_lost: false,
            }),
            Err(WorkerError::Timeout(limit)) => {
                tracing::warn!(timeout_secs = limit.as_secs(), "Code execution timed out; discarding worker");
                self.discard();
                Ok(Evaluation::lost(&EvalError::Timeout(limit), &prepared))
            }
            Err(err) if err.is_fatal() => {
                tracing::warn!(error = %err, "Python worker lost during execution; discarding it");
                self.discard();
                Ok(Evaluation::lost(&EvalError::WorkerLost(err), &prepared))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Discard every binding and reseed the defaults.
    ///
    /// When the worker cannot be reset it is dropped; the next call starts
    /// a fresh one, which is equivalent.
    pub fn reset(&mut self) {
        let timeout = self.config.exec_timeout;
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        if let Err(err) = worker.reset(&self.config.seed_modules, timeout) {
            tracing::warn!(error = %err, "Worker reset failed; it will be restarted");
            self.discard();
        }
    }

    pub fn names(&mut self) -> Result<NamespaceSnapshot, WorkerError> {
        let timeout = self.config.exec_timeout;
        let result = self.worker()?.names(timeout);
        result.map_err(|err| self.fail(err))
    }

    pub fn get(&mut self, name: &str) -> Result<Option<Value>, WorkerError> {
        let timeout = self.config.exec_timeout;
        let result = self.worker()?.get(name, timeout);
        result.map_err(|err| self.fail(err))
    }

    pub fn bind(&mut self, name: &str, value: &Value) -> Result<(), WorkerError> {
        let timeout = self.config.exec_timeout;
        let result = self.worker()?.bind(name, value, timeout);
        result.map_err(|err| self.fail(err))
    }

    /// Stop the worker, if any.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn worker(&mut self) -> Result<&mut Worker, WorkerError> {
        if self.worker.as_mut().is_some_and(|w| !w.is_alive()) {
            tracing::warn!("Python worker died; starting a fresh namespace");
            self.worker = None;
        }

        if self.worker.is_none() {
            let mut worker = Worker::spawn(&self.config.python, &self.config.working_dir)?;
            worker.init(&self.config.seed_modules, self.config.exec_timeout)?;
            self.worker = Some(worker);
        }

        self.worker
            .as_mut()
            .ok_or_else(|| WorkerError::protocol("worker unavailable"))
    }

    fn fail(&mut self, err: WorkerError) -> WorkerError {
        if err.is_fatal() {
            tracing::warn!(error = %err, "Discarding python worker");
            self.discard();
        }
        err
    }

    fn discard(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.kill();
        }
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
