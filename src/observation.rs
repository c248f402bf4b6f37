//! Observation text returned to the agent.

use crate::evaluator::LastValue;

pub const NO_OUTPUT: &str = "Code executed successfully with no output";
pub const RESET_CONFIRMATION: &str = "Context reset successfully";

const SHELL_HEADER: &str = "SHELL OUTPUT:\n";
const STDOUT_HEADER: &str = "PYTHON STDOUT:\n";
const STDERR_HEADER: &str = "PYTHON STDERR:\n";

/// `Executing: <cmd>` followed by the line's output, for every shell line.
#[must_use]
pub fn shell_section<'a, I>(lines: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut parts = Vec::new();
    for (command, output) in lines {
        parts.push(format!("Executing: {command}"));
        parts.push(output.to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("{SHELL_HEADER}{}", parts.join("\n")))
    }
}

/// Stdout and stderr blocks; an empty stream contributes nothing.
#[must_use]
pub fn python_section(stdout: &str, stderr: &str) -> Option<String> {
    let mut parts = Vec::new();
    if !stdout.is_empty() {
        parts.push(format!("{STDOUT_HEADER}{stdout}"));
    }
    if !stderr.is_empty() {
        parts.push(format!("{STDERR_HEADER}{stderr}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Join sections with a blank line, or report that nothing was produced.
#[must_use]
pub fn assemble<I>(sections: I) -> String
where
    I: IntoIterator<Item = Option<String>>,
{
    let sections: Vec<String> = sections.into_iter().flatten().collect();
    if sections.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        sections.join("\n\n")
    }
}

#[must_use]
pub fn last_expression(last: &LastValue) -> String {
    match last {
        LastValue::Value { repr } => format!("\n[Last expression result]: {repr}"),
        LastValue::Unrepresentable => "\n[Last expression result] (unable to represent)".to_string(),
    }
}

/// Text for a failure that escaped the normal reporting path.
#[must_use]
pub fn execution_error(message: &str, detail: &str) -> String {
    format!("EXECUTION ERROR: {message}\n{detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_invocation() {
        assert_eq!(assemble([None, None]), NO_OUTPUT);
    }

    #[test]
    fn shell_lines_alternate_command_and_output() {
        let section = shell_section([("echo a", "a\n"), ("true", "")]).unwrap();
        assert_eq!(section, "SHELL OUTPUT:\nExecuting: echo a\na\n\nExecuting: true\n");
        assert!(shell_section(std::iter::empty()).is_none());
    }

    #[test]
    fn python_streams() {
        assert_eq!(python_section("2\n", "").unwrap(), "PYTHON STDOUT:\n2\n");
        assert_eq!(
            python_section("out", "err").unwrap(),
            "PYTHON STDOUT:\nout\nPYTHON STDERR:\nerr"
        );
        assert!(python_section("", "").is_none());
    }

    #[test]
    fn sections_are_separated_by_blank_line() {
        let text = assemble([
            shell_section([("echo hi", "hi\n")]),
            python_section("2\n", ""),
        ]);
        assert_eq!(
            text,
            "SHELL OUTPUT:\nExecuting: echo hi\nhi\n\n\nPYTHON STDOUT:\n2\n"
        );
    }

    #[test]
    fn execution_error_format() {
        assert_eq!(
            execution_error("boom", "Caused by: io"),
            "EXECUTION ERROR: boom\nCaused by: io"
        );
    }
}
