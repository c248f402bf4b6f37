//! Persistent notebook-style Python execution for agent tool loops.
//!
//! A [`Session`] owns one long-lived interpreter namespace. Each submission is
//! cleaned of a markdown fence, split into `!` shell lines and Python code, and
//! answered with a single observation string.

pub mod command_safety;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod namespace;
pub mod normalize;
pub mod observation;
pub mod partition;
pub mod session;
pub mod shell;
pub mod tools;
pub mod utils;

pub use config::Config;
pub use error::{EvalError, SessionError, ShellError, WorkerError};
pub use namespace::{AutoImport, NamespaceSnapshot, Value};
pub use session::{Session, SessionSettings, SharedSession};
pub use tools::{ToolRegistry, ToolRegistryBuilder};
