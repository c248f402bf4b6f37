//! Input normalization: unwraps a submission that arrives as one fenced
//! markdown code block.

use regex::Regex;
use std::sync::OnceLock;

static FENCE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_fence_regex() -> &'static Regex {
    FENCE_REGEX.get_or_init(|| {
        // Whole input is a single ```lang ... ``` block, surrounding whitespace allowed
        Regex::new(r"(?s)^\s*```\w*\s*\n(.*?)\n\s*```\s*$").unwrap()
    })
}

/// Strip a markdown code fence spanning the whole input.
///
/// Returns the input unchanged when it is not exactly one fenced block.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let Some(inner) = get_fence_regex()
        .captures(raw)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
    else {
        return raw;
    };

    // Two blocks back to back also satisfy the pattern; leave those alone.
    if inner.lines().any(|line| line.trim_start().starts_with("```")) {
        return raw;
    }
    inner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_with_language_tag() {
        assert_eq!(strip_code_fence("```python\nprint(1)\n```"), "print(1)");
    }

    #[test]
    fn strips_fence_without_language_tag() {
        assert_eq!(strip_code_fence("```\nx = 1\ny = 2\n```"), "x = 1\ny = 2");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(
            strip_code_fence("  \n```py\nprint('hi')\n```  \n\n"),
            "print('hi')"
        );
    }

    #[test]
    fn keeps_inner_indentation() {
        let raw = "```python\nfor i in range(2):\n    print(i)\n```";
        assert_eq!(strip_code_fence(raw), "for i in range(2):\n    print(i)");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(strip_code_fence("print(1)"), "print(1)");
        assert_eq!(strip_code_fence(""), "");
    }

    #[test]
    fn partial_fence_is_untouched() {
        let raw = "here is code:\n```python\nprint(1)\n```";
        assert_eq!(strip_code_fence(raw), raw);

        let unterminated = "```python\nprint(1)";
        assert_eq!(strip_code_fence(unterminated), unterminated);
    }

    #[test]
    fn multiple_fences_are_untouched() {
        let raw = "```python\na = 1\n```\n```python\nb = 2\n```";
        assert_eq!(strip_code_fence(raw), raw);
    }
}
