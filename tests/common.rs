//! Test utilities for notebook-exec integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use notebook_exec::session::{Session, SessionSettings};
use notebook_exec::utils::find_program_on_path;

/// Interpreter available on this machine, if any.
pub fn python() -> Option<PathBuf> {
    ["python3", "python"]
        .iter()
        .find_map(|name| find_program_on_path(name))
}

/// Settings for a session rooted at `dir`, or `None` when no interpreter exists.
pub fn settings(dir: &Path) -> Option<SessionSettings> {
    match python() {
        Some(python) => Some(SessionSettings::new(dir, python)),
        None => {
            eprintln!("skipping: no python interpreter on PATH");
            None
        }
    }
}

/// A session rooted at `dir` with default settings.
pub fn session(dir: &Path) -> Option<Session> {
    settings(dir).map(Session::new)
}
