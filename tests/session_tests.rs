//! End-to-end session tests against a real interpreter.
//!
//! Each test skips itself when no python is on `PATH`.

mod common;

#[cfg(test)]
mod session_tests {
    use std::time::Duration;

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use notebook_exec::namespace::{AutoImport, Value};
    use notebook_exec::observation::{NO_OUTPUT, RESET_CONFIRMATION};
    use notebook_exec::session::Session;

    use super::common;

    #[test]
    fn test_bindings_persist_between_calls() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        assert_eq!(session.execute("x = 41"), NO_OUTPUT);
        assert_eq!(
            session.execute("x + 1"),
            "PYTHON STDOUT:\n\n[Last expression result]: 42"
        );
        Ok(())
    }

    #[test]
    fn test_print_and_last_expression() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        assert_eq!(
            session.execute("print('hi')\n'a' * 2"),
            "PYTHON STDOUT:\nhi\n\n[Last expression result]: 'aa'"
        );
        // A trailing call returning None is not echoed.
        assert_eq!(session.execute("print('x')"), "PYTHON STDOUT:\nx\n");
        Ok(())
    }

    #[test]
    fn test_parenthesized_and_semicolon_expressions() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        assert_eq!(
            session.execute("y = 2; (y *\n 3)"),
            "PYTHON STDOUT:\n\n[Last expression result]: 6"
        );
        Ok(())
    }

    #[test]
    fn test_unrepresentable_last_value() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let code = "class Bad:\n    def __repr__(self):\n        raise ValueError('no')\nBad()";
        assert_eq!(
            session.execute(code),
            "PYTHON STDOUT:\n\n[Last expression result] (unable to represent)"
        );
        Ok(())
    }

    #[test]
    fn test_errors_are_contained() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        session.execute("before = 1");
        let observation = session.execute("1/0");
        assert!(observation.starts_with("PYTHON STDERR:\nTraceback (most recent call last):"));
        assert!(observation.contains("ZeroDivisionError: division by zero"));
        assert!(observation.contains("<cell-"));

        assert_eq!(
            session.execute("before"),
            "PYTHON STDOUT:\n\n[Last expression result]: 1"
        );
        Ok(())
    }

    #[test]
    fn test_output_before_error_is_kept() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let observation = session.execute("print('partial')\nraise KeyError('k')");
        assert!(observation.starts_with("PYTHON STDOUT:\npartial\n\nPYTHON STDERR:\n"));
        assert!(observation.contains("KeyError: 'k'"));
        Ok(())
    }

    #[test]
    fn test_syntax_error_is_reported() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let invocation = session.execute_detailed("def (")?;
        let evaluation = invocation.evaluation.expect("code was evaluated");
        assert!(!evaluation.parsed);
        assert!(evaluation.stderr.contains("SyntaxError"));
        Ok(())
    }

    #[test]
    fn test_system_exit_does_not_end_session() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        session.execute("kept = 'yes'");
        let observation = session.execute("import sys; sys.exit(3)");
        assert!(observation.contains("SystemExit: 3"));
        assert!(session.is_running());
        assert_eq!(
            session.execute("kept"),
            "PYTHON STDOUT:\n\n[Last expression result]: 'yes'"
        );
        Ok(())
    }

    #[test]
    fn test_stdin_is_not_interactive() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let observation = session.execute("input()");
        assert!(observation.contains("EOFError"));
        Ok(())
    }

    #[test]
    fn test_reset_clears_namespace_and_history() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        session.execute("secret = 1");
        assert_eq!(session.reset(), RESET_CONFIRMATION);
        assert!(session.history().is_empty());
        assert!(session.execute("secret").contains("NameError"));

        // Seed modules come back and a second reset changes nothing.
        assert_eq!(session.reset(), RESET_CONFIRMATION);
        let once = session.names()?;
        assert_eq!(session.reset(), RESET_CONFIRMATION);
        let twice = session.names()?;
        assert_eq!(once, twice);
        assert!(once.iter().any(|name| name == "os"));
        assert!(!once.iter().any(|name| name == "secret"));
        Ok(())
    }

    #[test]
    fn test_reset_forgets_old_cell_sources() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        for i in 0..5 {
            session.execute(&format!("v{i} = {i}"));
        }
        session.reset();
        assert_eq!(
            session.execute(
                "import linecache\nlen([k for k in linecache.cache if k.startswith('<cell-')])"
            ),
            "PYTHON STDOUT:\n\n[Last expression result]: 1"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_worker_keeps_shell_output() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        session.execute("lost = 1");
        let observation = session.execute(
            "!echo SHELL_RAN > marker.txt\n!echo visible\nimport os\nprint('before')\nos.write(2, b'last words\\n')\nos._exit(1)",
        );
        assert!(tmp.path().join("marker.txt").exists());
        assert!(observation.starts_with("SHELL OUTPUT:\nExecuting: echo SHELL_RAN > marker.txt\n"));
        assert!(observation.contains("Executing: echo visible\nvisible\n"));
        assert!(observation.contains("PYTHON STDERR:\nPython worker exited unexpectedly"));
        assert!(observation.contains("last words"));
        assert!(observation.contains("The namespace was lost and will be reseeded"));
        assert!(!observation.contains("EXECUTION ERROR"));

        let invocation = session.execute_detailed("1 + 1")?;
        assert_eq!(
            invocation.observation(),
            "PYTHON STDOUT:\n\n[Last expression result]: 2"
        );
        assert!(session.execute("lost").contains("NameError"));
        Ok(())
    }

    #[test]
    fn test_workdir_modules_do_not_shadow_the_worker() -> Result<()> {
        let tmp = tempdir()?;
        std::fs::write(tmp.path().join("json.py"), "raise RuntimeError('shadowed')\n")?;
        std::fs::write(tmp.path().join("helper.py"), "VALUE = 3\n")?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        assert_eq!(
            session.execute("1 + 1"),
            "PYTHON STDOUT:\n\n[Last expression result]: 2"
        );
        // The working directory is still importable for user code.
        assert_eq!(
            session.execute("import helper\nhelper.VALUE"),
            "PYTHON STDOUT:\n\n[Last expression result]: 3"
        );
        Ok(())
    }

    #[test]
    fn test_markdown_fence_is_stripped() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        assert_eq!(
            session.execute("```python\nprint(1)\n```"),
            "PYTHON STDOUT:\n1\n"
        );
        assert_eq!(session.history()[0].code, "print(1)");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_lines_run_before_code() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let observation = session.execute("!echo hi\nprint('py')\n!echo later");
        assert_eq!(
            observation,
            "SHELL OUTPUT:\nExecuting: echo hi\nhi\n\nExecuting: echo later\nlater\n\n\nPYTHON STDOUT:\npy\n"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_and_code_share_working_dir() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        session.execute("!echo data > note.txt");
        assert_eq!(
            session.execute("open('note.txt').read().strip()"),
            "PYTHON STDOUT:\n\n[Last expression result]: 'data'"
        );
        Ok(())
    }

    #[test]
    fn test_blocked_line_does_not_stop_code() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let observation = session.execute("!rm -rf /\nprint('still here')");
        assert!(observation.starts_with(
            "SHELL OUTPUT:\nExecuting: rm -rf /\nERROR: Potentially dangerous command blocked for security reasons"
        ));
        assert!(observation.ends_with("PYTHON STDOUT:\nstill here\n"));
        Ok(())
    }

    #[test]
    fn test_host_bindings_round_trip() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        session.bind("n", 5_i64)?;
        session.bind("label", "ok")?;
        assert_eq!(session.get("n")?, Some(Value::Int(5)));
        assert_eq!(
            session.execute("label * n"),
            "PYTHON STDOUT:\n\n[Last expression result]: 'okokokokok'"
        );

        session.execute("pair = [1, 2]");
        assert_eq!(
            session.get("pair")?,
            Some(Value::Opaque {
                type_name: "list".to_string(),
                repr: "[1, 2]".to_string(),
            })
        );
        assert_eq!(session.get("missing")?, None);

        let snapshot = session.snapshot()?;
        assert!(snapshot.contains("pair"));
        assert!(snapshot.names().all(|name| !name.starts_with("__")));

        assert!(session.bind("class", 1_i64).is_err());
        Ok(())
    }

    #[test]
    fn test_auto_imports_are_bound_lazily() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut settings) = common::settings(tmp.path()) else {
            return Ok(());
        };
        settings.auto_imports = vec![
            AutoImport::new("j", "json"),
            AutoImport::new("missing", "no_such_module_for_tests"),
            AutoImport::new("osp", "os.path"),
        ];
        let mut session = Session::new(settings);

        assert_eq!(
            session.execute("j.dumps([1])"),
            "PYTHON STDOUT:\n\n[Last expression result]: '[1]'"
        );
        assert_eq!(
            session.execute("'missing' in dir()"),
            "PYTHON STDOUT:\n\n[Last expression result]: False"
        );
        assert_eq!(
            session.execute("osp.basename('a/b.txt')"),
            "PYTHON STDOUT:\n\n[Last expression result]: 'b.txt'"
        );
        Ok(())
    }

    #[test]
    fn test_user_binding_wins_over_auto_import() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut settings) = common::settings(tmp.path()) else {
            return Ok(());
        };
        settings.auto_imports = vec![AutoImport::new("j", "json")];
        let mut session = Session::new(settings);

        session.execute("j = 7");
        assert_eq!(
            session.execute("j"),
            "PYTHON STDOUT:\n\n[Last expression result]: 7"
        );
        Ok(())
    }

    #[test]
    fn test_timeout_restarts_with_fresh_namespace() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut settings) = common::settings(tmp.path()) else {
            return Ok(());
        };
        settings.exec_timeout = Some(Duration::from_secs(2));
        let mut session = Session::new(settings);

        session.execute("lost = 1");
        let observation = session.execute("import time\ntime.sleep(30)");
        assert!(observation.starts_with("PYTHON STDERR:\nExecution timed out after 2s"));
        assert!(!session.is_running());

        assert_eq!(
            session.execute("1 + 1"),
            "PYTHON STDOUT:\n\n[Last expression result]: 2"
        );
        assert!(session.execute("lost").contains("NameError"));
        Ok(())
    }

    #[test]
    fn test_detailed_invocation_record() -> Result<()> {
        let tmp = tempdir()?;
        let Some(mut session) = common::session(tmp.path()) else {
            return Ok(());
        };

        let invocation = session.execute_detailed("```\n!echo a\nv = 3\nv\n```")?;
        assert_eq!(invocation.cleaned, "!echo a\nv = 3\nv");
        assert_eq!(invocation.partition.shell_lines, vec!["echo a".to_string()]);
        assert_eq!(invocation.shell.len(), 1);

        let evaluation = invocation.evaluation.as_ref().expect("code was evaluated");
        assert!(evaluation.parsed);
        assert!(evaluation.rewritten);
        assert_eq!(evaluation.stdout_with_echo(), "\n[Last expression result]: 3");
        Ok(())
    }
}
