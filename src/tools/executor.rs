//! Agent tools backed by a shared execution session.

use std::sync::PoisonError;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::spec::{ToolCapability, ToolError, ToolResult, ToolSpec, required_str};
use crate::session::{Session, SharedSession, error_observation};

const EXECUTOR_DESCRIPTION: &str = "\
Executes Python code in a persistent Jupyter-like REPL environment.

This tool maintains session context between runs (variables, imports, models, etc).
Supports:
  - Python code execution (multi-line, expressions, function/class definitions)
  - Shell commands prefixed with `!` (e.g., `!ls`, `!pip install pandas`)
  - Inline package installation via pip or conda
  - Auto-imports common libraries like pandas (pd), numpy (np), matplotlib (plt), seaborn (sns)
  - Reading/writing local files using standard Python (`open()`, `os.listdir()`, etc)

Input Format:
  - Accepts raw string input of Python code (multi-line allowed)
  - Markdown-style code blocks are cleaned automatically (```python ... ```)

Examples:
  - Python: `df = pd.read_csv('data.csv'); df.head()`
  - Shell: `!pip install seaborn`
  - Mixed:
    ```python
    !pip install pandas
    import pandas as pd
    df = pd.read_csv('file.csv')
    df.describe()
    ```

Avoid:
  - Dangerous shell commands (`rm`, `shutdown`, `kill`, `format`, etc are blocked)
  - Unsupported languages (only Python is allowed)
  - Improper indentation or syntax in code blocks

Use for step-by-step execution, debugging, and interactive workflows like EDA, feature \
engineering, model training, plotting, and saving files. The tool behaves like an advanced \
code cell in Jupyter Notebook.";

/// Run a blocking closure against the session off the async runtime.
async fn with_session<T, F>(session: &SharedSession, f: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce(&mut Session) -> T + Send + 'static,
{
    let session = session.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    })
    .await
    .map_err(|e| ToolError::execution_failed(format!("Session task failed: {e}")))
}

/// `jupyter_code_executor`: run a block of code and shell lines.
pub struct CodeExecutorTool {
    session: SharedSession,
}

impl CodeExecutorTool {
    #[must_use]
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ToolSpec for CodeExecutorTool {
    fn name(&self) -> &'static str {
        "jupyter_code_executor"
    }

    fn description(&self) -> &'static str {
        EXECUTOR_DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to run; lines starting with `!` run in the shell"
                }
            },
            "required": ["code"]
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![
            ToolCapability::ExecutesCode,
            ToolCapability::MutatesState,
            ToolCapability::RequiresApproval,
        ]
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let code = required_str(&input, "code")?.to_string();

        let (outcome, history_len) = with_session(&self.session, move |session| {
            let outcome = session.execute_detailed(&code);
            (outcome, session.history().len())
        })
        .await?;

        // Code that raised is still a successful call; only a broken session is not.
        let result = match outcome {
            Ok(invocation) => {
                let lost = invocation
                    .evaluation
                    .as_ref()
                    .is_some_and(|evaluation| evaluation.worker_lost);
                let observation = invocation.observation();
                if lost {
                    ToolResult::error(observation).with_metadata(json!({
                        "history_len": history_len,
                        "error": "worker_lost",
                    }))
                } else {
                    ToolResult::success(observation).with_metadata(json!({
                        "history_len": history_len,
                    }))
                }
            }
            Err(err) => ToolResult::error(error_observation(&err)).with_metadata(json!({
                "history_len": history_len,
                "error": err.category(),
            })),
        };
        Ok(result)
    }
}

/// `reset_code_context`: discard every binding and the history.
pub struct ResetContextTool {
    session: SharedSession,
}

impl ResetContextTool {
    #[must_use]
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ToolSpec for ResetContextTool {
    fn name(&self) -> &'static str {
        "reset_code_context"
    }

    fn description(&self) -> &'static str {
        "Reset the code execution environment: clears all variables, imports and history \
         and restores the default modules."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::MutatesState]
    }

    async fn execute(&self, _input: Value) -> Result<ToolResult, ToolError> {
        let confirmation = with_session(&self.session, Session::reset).await?;
        Ok(ToolResult::success(confirmation))
    }
}
