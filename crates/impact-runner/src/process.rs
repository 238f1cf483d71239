//! Impact-T process execution.
//!
//! Two policies: [`execute`] streams stdout lines lazily and reports a
//! non-zero exit once the stream is drained; [`execute_bounded`] blocks up
//! to a deadline, captures combined output and never returns an error.
//! The working directory is always passed to the spawned command; the
//! current directory of this process is never changed.

use std::io::{BufRead, BufReader, Lines, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ProcessError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const WHY_TIMEOUT: &str = "timeout";
pub const WHY_UNKNOWN: &str = "unknown";

pub fn command_line(cmd: &[String]) -> String {
    cmd.join(" ")
}

fn build_command(cmd: &[String], cwd: &Path) -> Result<Command, ProcessError> {
    let (program, args) = cmd.split_first().ok_or(ProcessError::EmptyCommand)?;
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).stdin(Stdio::null());
    Ok(command)
}

/// Lazily produced stdout lines of a running process. Finite and not
/// restartable. A non-zero exit is yielded as the final item.
pub struct OutputStream {
    child: Child,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    command: String,
    status: Option<ExitStatus>,
    finished: bool,
}

impl OutputStream {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit status, known once the stream has ended.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    fn finish(&mut self) -> Option<Result<String, ProcessError>> {
        self.finished = true;
        self.lines = None;
        match self.child.wait() {
            Ok(status) => {
                self.status = Some(status);
                if status.success() {
                    None
                } else {
                    Some(Err(ProcessError::NonZeroExit {
                        code: status.code().unwrap_or(-1),
                        command: self.command.clone(),
                    }))
                }
            }
            Err(source) => Some(Err(ProcessError::Read {
                command: self.command.clone(),
                source,
            })),
        }
    }
}

impl Iterator for OutputStream {
    type Item = Result<String, ProcessError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.lines.as_mut().and_then(|lines| lines.next()) {
            Some(Ok(line)) => Some(Ok(line)),
            Some(Err(source)) => {
                let _ = self.child.kill();
                let _ = self.finish();
                Some(Err(ProcessError::Read {
                    command: self.command.clone(),
                    source,
                }))
            }
            None => self.finish(),
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(command = %self.command, "output stream dropped early; killing process");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Spawns `cmd` in `cwd` and returns its stdout as a line stream. Stderr
/// is inherited.
pub fn execute(cmd: &[String], cwd: &Path) -> Result<OutputStream, ProcessError> {
    let command_str = command_line(cmd);
    let mut command = build_command(cmd, cwd)?;
    command.stdout(Stdio::piped()).stderr(Stdio::inherit());
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        command: command_str.clone(),
        source,
    })?;
    debug!(command = %command_str, cwd = %cwd.display(), pid = child.id(), "spawned");
    let lines = child.stdout.take().map(|out| BufReader::new(out).lines());
    Ok(OutputStream {
        child,
        lines,
        command: command_str,
        status: None,
        finished: false,
    })
}

/// Result of a bounded execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundedOutput {
    /// Combined stdout and stderr, line-interleaved in arrival order.
    pub log: String,
    pub error: bool,
    /// `""` on success, `"timeout"`, or `"unknown"`.
    pub why_error: String,
    pub exit_code: Option<i32>,
}

impl BoundedOutput {
    fn failed(log: String, why: &str, exit_code: Option<i32>) -> Self {
        Self {
            log,
            error: true,
            why_error: why.to_string(),
            exit_code,
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: R, sink: Arc<Mutex<String>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if let Ok(mut log) = sink.lock() {
                        log.push_str(&line);
                    }
                }
            }
        }
    })
}

fn snapshot(log: &Arc<Mutex<String>>) -> String {
    log.lock().map(|s| s.clone()).unwrap_or_default()
}

/// Runs `cmd` in `cwd`, waiting at most `timeout`.
///
/// On timeout the process is killed and the output captured so far is
/// returned with `why_error = "timeout"`. Spawn failures, wait failures and
/// non-zero exits report `"unknown"`; a non-zero exit is an execution failure
/// here even though the exit status alone carries no other error text.
pub fn execute_bounded(cmd: &[String], cwd: &Path, timeout: Duration) -> BoundedOutput {
    let command_str = command_line(cmd);
    let mut command = match build_command(cmd, cwd) {
        Ok(c) => c,
        Err(e) => return BoundedOutput::failed(e.to_string(), WHY_UNKNOWN, None),
    };
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command = %command_str, error = %e, "failed to spawn");
            return BoundedOutput::failed(format!("failed to spawn: {}", e), WHY_UNKNOWN, None);
        }
    };

    let log = Arc::new(Mutex::new(String::new()));
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(out, Arc::clone(&log)));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(err, Arc::clone(&log)));
    }

    // A timeout past the clock's range never expires.
    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(command = %command_str, timeout_s = timeout.as_secs_f64(), "process timed out");
                // Readers may still be blocked on pipes held by grandchildren.
                let mut partial = snapshot(&log);
                partial.push_str(&format!(
                    "\n'{}' timed out after {} seconds\n",
                    command_str,
                    timeout.as_secs_f64()
                ));
                return BoundedOutput::failed(partial, WHY_TIMEOUT, None);
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                warn!(command = %command_str, error = %e, "failed waiting for process");
                return BoundedOutput::failed(snapshot(&log), WHY_UNKNOWN, None);
            }
        }
    };

    for reader in readers {
        let _ = reader.join();
    }
    let output = snapshot(&log);
    let code = status.code();
    if status.success() {
        debug!(command = %command_str, "process finished");
        BoundedOutput {
            log: output,
            error: false,
            why_error: String::new(),
            exit_code: code,
        }
    } else {
        warn!(command = %command_str, code = ?code, "process exited with failure");
        BoundedOutput::failed(output, WHY_UNKNOWN, code)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn stream_yields_lines_in_order() {
        let cwd = std::env::temp_dir();
        let lines: Vec<String> = execute(&sh("echo one; echo two"), &cwd)
            .expect("spawn")
            .collect::<Result<_, _>>()
            .expect("lines");
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn stream_reports_non_zero_exit_after_output() {
        let cwd = std::env::temp_dir();
        let items: Vec<Result<String, ProcessError>> =
            execute(&sh("echo partial; exit 3"), &cwd).expect("spawn").collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().expect("line"), "partial");
        match &items[1] {
            Err(ProcessError::NonZeroExit { code, command }) => {
                assert_eq!(*code, 3);
                assert!(command.starts_with("sh -c"));
            }
            other => panic!("expected non-zero exit, got {:?}", other),
        }
    }

    #[test]
    fn stream_runs_in_given_directory() {
        let cwd = std::env::temp_dir().canonicalize().expect("canon");
        let before = std::env::current_dir().expect("cwd");
        let lines: Vec<String> = execute(&sh("pwd -P"), &cwd)
            .expect("spawn")
            .collect::<Result<_, _>>()
            .expect("lines");
        assert_eq!(lines, vec![cwd.to_string_lossy().to_string()]);
        assert_eq!(std::env::current_dir().expect("cwd"), before);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let cwd = std::env::temp_dir();
        let err = execute(&["/nonexistent/impact_binary".to_string()], &cwd)
            .err()
            .expect("spawn error");
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(matches!(execute(&[], &cwd), Err(ProcessError::EmptyCommand)));
    }

    #[test]
    fn bounded_times_out_on_slow_command() {
        let cwd = std::env::temp_dir();
        let cmd = vec!["sleep".to_string(), "5".to_string()];
        let start = Instant::now();
        let out = execute_bounded(&cmd, &cwd, Duration::from_secs_f64(0.001));
        assert!(out.error);
        assert_eq!(out.why_error, "timeout");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn bounded_with_unreachable_deadline_waits_for_exit() {
        let cwd = std::env::temp_dir();
        let out = execute_bounded(&sh("echo done"), &cwd, Duration::MAX);
        assert!(!out.error, "{:?}", out);
        assert_eq!(out.log, "done\n");
    }

    #[test]
    fn bounded_captures_combined_output() {
        let cwd = std::env::temp_dir();
        let out = execute_bounded(&sh("echo out; echo err 1>&2"), &cwd, Duration::from_secs(10));
        assert!(!out.error, "{:?}", out);
        assert_eq!(out.why_error, "");
        assert!(out.log.contains("out\n"));
        assert!(out.log.contains("err\n"));
        assert_eq!(out.exit_code, Some(0));
    }

    #[test]
    fn bounded_failures_are_unknown() {
        let cwd = std::env::temp_dir();
        let out = execute_bounded(&sh("exit 2"), &cwd, Duration::from_secs(10));
        assert!(out.error);
        assert_eq!(out.why_error, "unknown");
        assert_eq!(out.exit_code, Some(2));
        let out = execute_bounded(
            &["/nonexistent/impact_binary".to_string()],
            &cwd,
            Duration::from_secs(1),
        );
        assert!(out.error);
        assert_eq!(out.why_error, "unknown");
    }
}
