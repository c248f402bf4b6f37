//! CPython worker process hosting the session namespace.
//!
//! The worker runs a small driver script and talks one JSON object per line:
//! requests on its stdin, replies on a private copy of its stdout. Anything
//! the user's code (or a child process) writes to the real stdout/stderr
//! ends up on the worker's stderr, which is forwarded to the log. The last
//! few stderr lines are also kept so a dying worker can say why it died.

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use wait_timeout::ChildExt;

use crate::error::WorkerError;
use crate::namespace::{AutoImport, NamespaceSnapshot, Value};
use crate::utils::{isolate_process_group, kill_process_tree};

const DRIVER_SOURCE: &str = include_str!("driver.py");
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const STDERR_TAIL_LINES: usize = 20;

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Request sent to the worker.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    Init {
        seed_modules: &'a [String],
    },
    Reset {
        seed_modules: &'a [String],
    },
    Exec {
        code: &'a str,
        capture: Option<&'a str>,
        auto_imports: &'a [AutoImport],
    },
    Names,
    Get {
        name: &'a str,
    },
    Bind {
        name: &'a str,
        value: &'a Value,
    },
    Shutdown,
}

/// Raw reply; which fields are present depends on the request.
#[derive(Debug, Default, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    last: Option<LastValue>,
    #[serde(default)]
    bindings: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    found: Option<bool>,
    #[serde(default)]
    value: Option<Value>,
}

/// Representation of the trailing expression value, when it was not `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LastValue {
    Value { repr: String },
    Unrepresentable,
}

/// Streams captured while executing one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecReply {
    pub stdout: String,
    pub stderr: String,
    pub last: Option<LastValue>,
}

/// A running worker process.
pub struct Worker {
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::Receiver<std::io::Result<String>>,
    stderr_tail: StderrTail,
    stderr_drain: Option<JoinHandle<()>>,
    program: PathBuf,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.child.id())
            .field("program", &self.program)
            .finish()
    }
}

impl Worker {
    /// Start the driver under `program` with `working_dir` as its cwd.
    pub fn spawn(program: &Path, working_dir: &Path) -> Result<Self, WorkerError> {
        let mut command = Command::new(program);
        command
            .arg("-u")
            .arg("-c")
            .arg(DRIVER_SOURCE)
            .current_dir(working_dir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut command);

        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::protocol("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::protocol("worker stdout unavailable"))?;
        let stderr_tail = StderrTail::default();
        let stderr_drain = child
            .stderr
            .take()
            .map(|stderr| spawn_log_drain(stderr, Arc::clone(&stderr_tail)));

        tracing::info!(pid = child.id(), program = %program.display(), "Started python worker");
        Ok(Self {
            child,
            stdin,
            replies: spawn_reply_reader(stdout),
            stderr_tail,
            stderr_drain,
            program: program.to_path_buf(),
        })
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Create the namespace and seed its default bindings.
    pub fn init(&mut self, seed_modules: &[String], timeout: Option<Duration>) -> Result<(), WorkerError> {
        self.roundtrip(&Request::Init { seed_modules }, timeout)
            .map(|_| ())
    }

    /// Discard every binding and reseed the defaults.
    pub fn reset(&mut self, seed_modules: &[String], timeout: Option<Duration>) -> Result<(), WorkerError> {
        self.roundtrip(&Request::Reset { seed_modules }, timeout)
            .map(|_| ())
    }

    /// Execute `code`, reading `capture` back as the last expression value.
    pub fn exec(
        &mut self,
        code: &str,
        capture: Option<&str>,
        auto_imports: &[AutoImport],
        timeout: Option<Duration>,
    ) -> Result<ExecReply, WorkerError> {
        let reply = self.roundtrip(
            &Request::Exec {
                code,
                capture,
                auto_imports,
            },
            timeout,
        )?;
        Ok(ExecReply {
            stdout: reply.stdout.unwrap_or_default(),
            stderr: reply.stderr.unwrap_or_default(),
            last: reply.last,
        })
    }

    pub fn names(&mut self, timeout: Option<Duration>) -> Result<NamespaceSnapshot, WorkerError> {
        let reply = self.roundtrip(&Request::Names, timeout)?;
        let bindings = reply
            .bindings
            .ok_or_else(|| WorkerError::protocol("names reply without bindings"))?;
        Ok(NamespaceSnapshot::new(bindings))
    }

    pub fn get(&mut self, name: &str, timeout: Option<Duration>) -> Result<Option<Value>, WorkerError> {
        let reply = self.roundtrip(&Request::Get { name }, timeout)?;
        match (reply.found, reply.value) {
            (Some(true), Some(value)) => Ok(Some(value)),
            (Some(false), _) => Ok(None),
            _ => Err(WorkerError::protocol("get reply without value")),
        }
    }

    pub fn bind(&mut self, name: &str, value: &Value, timeout: Option<Duration>) -> Result<(), WorkerError> {
        self.roundtrip(&Request::Bind { name, value }, timeout)
            .map(|_| ())
    }

    /// Ask the worker to exit, killing it if it does not.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if !self.is_alive() {
            return;
        }
        let _ = self.send(&Request::Shutdown);
        match self.child.wait_timeout(SHUTDOWN_GRACE) {
            Ok(Some(_)) => {}
            _ => self.kill(),
        }
    }

    /// Kill the process immediately.
    pub fn kill(&mut self) {
        tracing::debug!(pid = self.child.id(), "Killing python worker");
        kill_process_tree(&mut self.child);
        let _ = self.child.wait();
    }

    fn send(&mut self, request: &Request<'_>) -> Result<(), WorkerError> {
        let mut line = serde_json::to_string(request)
            .map_err(|err| WorkerError::protocol(format!("failed to encode request: {err}")))?;
        line.push('\n');
        let written = self
            .stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Err(self.exited()),
            Err(err) => Err(WorkerError::Io(err)),
        }
    }

    fn roundtrip(&mut self, request: &Request<'_>, timeout: Option<Duration>) -> Result<Reply, WorkerError> {
        self.send(request)?;

        let line = match timeout {
            Some(timeout) => match self.replies.recv_timeout(timeout) {
                Ok(line) => line,
                Err(mpsc::RecvTimeoutError::Timeout) => return Err(WorkerError::Timeout(timeout)),
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(self.exited()),
            },
            None => match self.replies.recv() {
                Ok(line) => line,
                Err(mpsc::RecvError) => return Err(self.exited()),
            },
        }?;

        parse_reply(&line)
    }

    /// Build the error for a worker that went away, with its last stderr.
    ///
    /// Waits briefly for the process and the stderr drain to finish so the
    /// final lines (usually a traceback) are not lost.
    fn exited(&mut self) -> WorkerError {
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let _ = self.child.wait_timeout(SHUTDOWN_GRACE);
        if let Some(drain) = self.stderr_drain.take() {
            while !drain.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if drain.is_finished() {
                let _ = drain.join();
            }
        }

        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stderr = tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        tracing::warn!(pid = self.child.id(), stderr = %stderr, "Python worker exited");
        WorkerError::Exited { stderr }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn parse_reply(line: &str) -> Result<Reply, WorkerError> {
    let reply: Reply = serde_json::from_str(line)
        .map_err(|err| WorkerError::protocol(format!("invalid reply ({err}): {line}")))?;
    if reply.ok {
        Ok(reply)
    } else {
        Err(WorkerError::Rejected(
            reply.error.unwrap_or_else(|| "unspecified error".to_string()),
        ))
    }
}

fn spawn_reply_reader(stdout: ChildStdout) -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn spawn_log_drain(stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    tracing::debug!(target: "notebook_exec::worker", "{}", line);

                    let mut lines = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if lines.len() == STDERR_TAIL_LINES {
                        lines.pop_front();
                    }
                    lines.push_back(line.to_string());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_op() {
        let table = vec![AutoImport::new("pd", "pandas")];
        let request = Request::Exec {
            code: "x",
            capture: Some("__temp_1"),
            auto_imports: &table,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "op": "exec",
                "code": "x",
                "capture": "__temp_1",
                "auto_imports": [{"alias": "pd", "module": "pandas"}],
            })
        );
        assert_eq!(
            serde_json::to_value(Request::Shutdown).unwrap(),
            json!({"op": "shutdown"})
        );
    }

    #[test]
    fn exec_reply_with_last_value() {
        let reply = parse_reply(
            r#"{"ok": true, "stdout": "hi\n", "stderr": "", "last": {"kind": "value", "repr": "42"}}"#,
        )
        .unwrap();
        assert_eq!(reply.stdout.as_deref(), Some("hi\n"));
        assert_eq!(
            reply.last,
            Some(LastValue::Value {
                repr: "42".to_string()
            })
        );
    }

    #[test]
    fn rejected_reply_is_an_error() {
        let err = parse_reply(r#"{"ok": false, "error": "'class' is not a valid identifier"}"#)
            .unwrap_err();
        assert!(matches!(err, WorkerError::Rejected(ref msg) if msg.contains("class")));
        assert!(!err.is_fatal());
    }

    #[test]
    fn garbage_reply_is_a_protocol_error() {
        let err = parse_reply("not json").unwrap_err();
        assert!(matches!(err, WorkerError::Protocol(_)));
    }

    #[cfg(unix)]
    #[test]
    fn early_exit_reports_stderr_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake-python");
        std::fs::write(&script, "#!/bin/sh\necho 'first line' >&2\necho 'ImportError: shadowed' >&2\nexit 1\n")
            .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let mut worker = Worker::spawn(&script, tmp.path()).unwrap();
        let err = worker
            .init(&[], Some(Duration::from_secs(10)))
            .unwrap_err();
        match err {
            WorkerError::Exited { ref stderr } => {
                assert_eq!(stderr, "first line\nImportError: shadowed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().ends_with("Last worker stderr:\nfirst line\nImportError: shadowed"));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Worker::spawn(&tmp.path().join("no-python"), tmp.path()).unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
    }
}
