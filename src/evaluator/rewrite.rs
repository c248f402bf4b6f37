//! Source rewrite that captures the value of a trailing bare expression.
//!
//! The code is parsed on the host; when the final top-level statement is an
//! expression statement, an assignment to a fresh temporary is spliced in
//! front of it. The rest of the source text is left byte-for-byte intact so
//! line numbers in tracebacks still match what the agent submitted.

use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::Parse;

/// Prefix of the temporary binding that receives the echoed value.
pub const TEMP_PREFIX: &str = "__temp_";

/// Code ready to be sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Source to execute.
    pub code: String,
    /// Temporary binding holding the last expression value, if the rewrite fired.
    pub capture: Option<String>,
    /// False when the host parser rejected the code and it is sent unmodified.
    pub parsed: bool,
}

impl Prepared {
    fn raw(code: &str, parsed: bool) -> Self {
        Self {
            code: code.to_string(),
            capture: None,
            parsed,
        }
    }
}

/// Parse `code` and, if it ends in a bare expression, bind that expression
/// to a fresh `__temp_<hex>` name.
#[must_use]
pub fn prepare(code: &str) -> Prepared {
    let suite = match ast::Suite::parse(code, "<cell>") {
        Ok(suite) => suite,
        Err(err) => {
            tracing::debug!(error = %err, "Host parse failed; executing raw source");
            return Prepared::raw(code, false);
        }
    };

    let Some(last) = suite.last() else {
        return Prepared::raw(code, true);
    };
    if !matches!(last, ast::Stmt::Expr(_)) {
        return Prepared::raw(code, true);
    }

    let search_from = suite
        .len()
        .checked_sub(2)
        .map_or(0, |idx| usize::from(suite[idx].end()));
    let stmt_start = usize::from(last.start());
    let insert_at = statement_start(code, search_from).min(stmt_start);

    let temp = temp_name();
    let mut rewritten = String::with_capacity(code.len() + temp.len() + 3);
    rewritten.push_str(&code[..insert_at]);
    rewritten.push_str(&temp);
    rewritten.push_str(" = ");
    rewritten.push_str(&code[insert_at..]);

    Prepared {
        code: rewritten,
        capture: Some(temp),
        parsed: true,
    }
}

fn temp_name() -> String {
    format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// First byte at or after `from` that can begin a statement.
///
/// Statement ranges can stop short of trailing separators, closing brackets
/// of a parenthesized value, comments and line continuations; all of those
/// are skipped here.
fn statement_start(code: &str, from: usize) -> usize {
    let bytes = code.as_bytes();
    let mut pos = from.min(bytes.len());
    while pos < bytes.len() {
        match bytes[pos] {
            b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b';' | b'\\' | b')' | b']' | b'}' => {
                pos += 1;
            }
            b'#' => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            _ => break,
        }
    }
    pos
}
