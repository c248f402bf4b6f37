//! Utility helpers shared across the crate.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};

/// Default cap on any single captured stream.
pub const MAX_OUTPUT_SIZE: usize = 30_000;

/// Truncate a string to at most `max_bytes`, backing off to a char boundary.
#[must_use]
pub fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate captured output, noting how much was dropped.
#[must_use]
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let kept = truncate_to_boundary(output, max_bytes);
    format!(
        "{kept}...\n\n[Output truncated at {} characters. {} characters omitted.]",
        kept.len(),
        output.len() - kept.len()
    )
}

/// Expand a leading `~` in a configured path.
#[must_use]
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

/// Find `.venv/bin/python` in `start` or one of its parents, stopping at `$HOME`.
#[must_use]
pub fn find_dot_venv_python(start: &Path) -> Option<PathBuf> {
    let stop_at_home = dirs::home_dir().filter(|home| start.starts_with(home));

    let mut dir = start.to_path_buf();
    loop {
        for candidate in venv_candidates(&dir) {
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if stop_at_home.as_ref().is_some_and(|stop| &dir == stop) {
            break;
        }
        let Some(parent) = dir.parent() else {
            break;
        };
        if parent == dir {
            break;
        }
        dir = parent.to_path_buf();
    }
    None
}

#[cfg(windows)]
fn venv_candidates(dir: &Path) -> [PathBuf; 1] {
    [dir.join(".venv").join("Scripts").join("python.exe")]
}

#[cfg(not(windows))]
fn venv_candidates(dir: &Path) -> [PathBuf; 2] {
    [
        dir.join(".venv").join("bin").join("python"),
        dir.join(".venv").join("bin").join("python3"),
    ]
}

/// Locate an executable on `PATH`.
#[must_use]
pub fn find_program_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        #[cfg(windows)]
        let candidate = dir.join(format!("{name}.exe"));
        #[cfg(not(windows))]
        let candidate = dir.join(name);

        if !candidate.is_file() {
            continue;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(&candidate)
                && meta.permissions().mode() & 0o111 != 0
            {
                return Some(candidate);
            }
        }

        #[cfg(not(unix))]
        {
            return Some(candidate);
        }
    }
    None
}

/// Start `command` in a process group of its own.
pub fn isolate_process_group(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = command;
}

/// Kill a child started with [`isolate_process_group`] and everything in its group.
pub fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // Safety: kill(2) on the group created for this child at spawn.
            let _ = unsafe { libc::kill(-pid, libc::SIGKILL) };
        }
    }
    let _ = child.kill();
}
