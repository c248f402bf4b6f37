//! Splits a submission into host-shell lines and interpretable code.
//!
//! Classification is positional: a `!` line inside a multi-line string
//! literal is still treated as a shell command.

/// Line prefix marking a host-shell command.
pub const SHELL_MARKER: char = '!';

/// A submission split into shell commands and code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Shell commands in submission order, marker removed and trimmed.
    pub shell_lines: Vec<String>,
    /// Remaining lines joined with `\n`, original order and indentation kept.
    pub code: String,
}

impl Partition {
    /// Whether any code line carries something other than whitespace.
    #[must_use]
    pub fn has_code(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// Partition normalized input line by line.
#[must_use]
pub fn partition(text: &str) -> Partition {
    let mut shell_lines = Vec::new();
    let mut code_lines = Vec::new();

    for line in text.split('\n') {
        if line.trim().starts_with(SHELL_MARKER) {
            let command = line.replacen(SHELL_MARKER, "", 1);
            let command = command.trim();
            if !command.is_empty() {
                shell_lines.push(command.to_string());
            }
        } else {
            code_lines.push(line);
        }
    }

    Partition {
        shell_lines,
        code: code_lines.join("\n"),
    }
}
