//! Error types for the execution session.
//!
//! Everything here is eventually rendered into observation text; the types
//! exist so callers can tell failure categories apart before that happens.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while running a host shell command.
///
/// Non-zero exits and timeouts are reported as outcomes, not errors.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture output of '{command}'")]
    Capture { command: String },

    #[error("Failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while talking to the interpreter worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start python worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to talk to python worker: {0}")]
    Io(#[from] std::io::Error),

    #[error("Python worker protocol error: {0}")]
    Protocol(String),

    #[error("Python worker exited unexpectedly{}", stderr_tail(.stderr))]
    Exited {
        /// Last lines the worker wrote to its stderr before dying.
        stderr: String,
    },

    #[error("Python worker did not answer within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Python worker rejected request: {0}")]
    Rejected(String),
}

impl WorkerError {
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the worker must be discarded after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let stderr = stderr.trim_end();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nLast worker stderr:\n{stderr}")
    }
}

/// Errors raised by the code evaluator.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Execution timed out after {}s; the namespace was lost and will be reseeded", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}\nThe namespace was lost and will be reseeded")]
    WorkerLost(#[source] WorkerError),
}

/// Errors surfaced by [`crate::session::Session`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Cannot bind '{name}': {reason}")]
    InvalidBinding { name: String, reason: String },

    #[error("Internal failure: {0}")]
    Panicked(String),
}

impl SessionError {
    /// Short machine-readable name of the failure, reported in tool metadata.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Eval(EvalError::Timeout(_)) => "timeout",
            Self::Eval(EvalError::WorkerLost(_)) => "worker_lost",
            Self::Eval(EvalError::Worker(err)) | Self::Worker(err) => match err {
                WorkerError::Spawn { .. } => "worker_spawn",
                WorkerError::Timeout(_) => "timeout",
                WorkerError::Rejected(_) => "rejected",
                WorkerError::Io(_) | WorkerError::Protocol(_) | WorkerError::Exited { .. } => {
                    "worker_lost"
                }
            },
            Self::InvalidBinding { .. } => "invalid_binding",
            Self::Panicked(_) => "internal",
        }
    }
}
