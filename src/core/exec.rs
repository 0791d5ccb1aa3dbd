//! Subprocess execution helper for build steps.
//!
//! Every external tool a builder runs goes through [`execute`], which logs
//! a `tool: message` console line, captures output, and turns a non-zero
//! exit status into an execution error carrying the command line and the
//! captured stdout+stderr.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use colored::Color;

use crate::Result;
use crate::core::console::Log;
use crate::error::RafterError;

/// Options controlling a single subprocess run.
#[derive(Default)]
pub struct ExecOptions<'a> {
    /// Bytes fed to the child's stdin, if any.
    pub stdin: Option<&'a [u8]>,
    /// Redirect the child's stdout into this file instead of capturing it.
    pub stdout_to: Option<&'a Path>,
    /// Suppress the console line; used by configuration probes.
    pub quieter: bool,
    /// Color for the console message.
    pub color: Option<Color>,
}

/// Run an argv vector, logging `label: message` on the console.
///
/// Exit code 0 is success. A non-zero exit, or a process that cannot be
/// launched at all, raises [`RafterError::Execution`] with the command
/// line and the captured stdout and stderr.
pub fn execute(log: &Log, cmd: &[String], label: &str, message: &str, opts: ExecOptions) -> Result<Output> {
    assert!(!cmd.is_empty(), "empty command line");

    if !opts.quieter {
        log.check_result(label, message, opts.color);
    }
    log::debug!("executing: {}", cmd.join(" "));

    let mut command = Command::new(&cmd[0]);
    command.args(&cmd[1..]);
    command.stderr(Stdio::piped());
    command.stdin(if opts.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    match opts.stdout_to {
        Some(path) => {
            let file = File::create(path)?;
            command.stdout(Stdio::from(file));
        }
        None => {
            command.stdout(Stdio::piped());
        }
    }

    let cmdline = cmd.join(" ");
    let mut child = command
        .spawn()
        .map_err(|e| RafterError::execution(&cmdline, None, e.to_string()))?;

    if let Some(bytes) = opts.stdin {
        // Taking stdin drops the handle when the write finishes, closing
        // the pipe so the child sees EOF.
        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(bytes)?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(RafterError::execution(
            &cmdline,
            output.status.code(),
            captured,
        ));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_log(tmp: &TempDir) -> Log {
        Log::open(&tmp.path().join("test.log"), 0, true, false).unwrap()
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_execute_captures_stdout() {
        let tmp = TempDir::new().unwrap();
        let log = test_log(&tmp);
        let output = execute(
            &log,
            &sh("echo hello"),
            "sh",
            "echo",
            ExecOptions {
                quieter: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    fn test_execute_failure_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        let log = test_log(&tmp);
        let err = execute(
            &log,
            &sh("echo 'syntax error' >&2; exit 1"),
            "sh",
            "failing",
            ExecOptions {
                quieter: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        match err {
            RafterError::Execution { code, output, .. } => {
                assert_eq!(code, Some(1));
                assert!(output.contains("syntax error"));
            }
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_missing_program_is_execution_error() {
        let tmp = TempDir::new().unwrap();
        let log = test_log(&tmp);
        let err = execute(
            &log,
            &["definitely-not-a-real-tool-470".to_string()],
            "missing",
            "",
            ExecOptions {
                quieter: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, RafterError::Execution { code: None, .. }));
    }

    #[test]
    fn test_stdout_redirection_to_file() {
        let tmp = TempDir::new().unwrap();
        let log = test_log(&tmp);
        let dst = tmp.path().join("deps.out");
        execute(
            &log,
            &sh("echo 'exe.cmo: lib.cmo'"),
            "sh",
            "deps",
            ExecOptions {
                stdout_to: Some(&dst),
                quieter: true,
                ..Default::default()
            },
        )
        .unwrap();
        let contents = fs::read_to_string(&dst).unwrap();
        assert_eq!(contents.trim(), "exe.cmo: lib.cmo");
    }

    #[test]
    fn test_stdin_is_fed_to_child() {
        let tmp = TempDir::new().unwrap();
        let log = test_log(&tmp);
        let output = execute(
            &log,
            &sh("cat"),
            "sh",
            "cat",
            ExecOptions {
                stdin: Some(b"from stdin"),
                quieter: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "from stdin");
    }
}
