//! Synchronous child-process execution.
//!
//! Thin wrapper around `std::process::Command` that captures stdout and
//! stderr separately while streaming lines to an optional progress callback,
//! enforces an optional deadline, and maps the ways a child can go wrong
//! (missing binary, signal death, timeout, nonzero exit) to typed errors.
//!
//! One runner drives one child at a time; `run` blocks until the child is
//! reaped, including after a kill on timeout.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How often the parent polls the child for exit while draining output.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How much stderr to carry in a `Failed` error.
const STDERR_TAIL_LINES: usize = 8;

/// Ways a tool invocation can fail before we even look at its output.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{program} did not finish within {limit:?} and was killed")]
    TimedOut { program: String, limit: Duration },

    #[error("{0} was terminated by a signal")]
    Crashed(String),

    #[error("{program} exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a finished child process.
#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Synchronous command runner with output capture and an optional deadline.
pub struct ProcessRunner {
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    on_line: Option<Box<dyn FnMut(&str)>>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            working_dir: None,
            timeout: None,
            on_line: None,
        }
    }

    /// Run the child in `dir` instead of the current directory.
    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    /// Kill the child if it runs longer than `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Receive every output line (stdout and stderr) as it arrives. The
    /// callback runs on the calling thread, between exit polls.
    pub fn on_line(mut self, callback: impl FnMut(&str) + 'static) -> Self {
        self.on_line = Some(Box::new(callback));
        self
    }

    /// Run `program` with `args`, capturing output until the child exits.
    ///
    /// A nonzero exit code is NOT an error here; use [`run_ok`] for the
    /// common "exit code 0 means success" contract.
    ///
    /// [`run_ok`]: ProcessRunner::run_ok
    pub fn run<S: AsRef<OsStr>>(
        &mut self,
        program: &str,
        args: &[S],
    ) -> Result<ProcessOutput, ProcessError> {
        debug!(
            program,
            args = ?args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(),
            "spawning"
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::ToolNotFound(program.to_string())
            } else {
                ProcessError::Io(e)
            }
        })?;

        let (tx, rx) = mpsc::channel();
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut output = ProcessOutput::default();
        let started = Instant::now();

        let status = loop {
            while let Ok((stream, line)) = rx.try_recv() {
                self.push_line(&mut output, stream, line);
            }

            if let Some(status) = child.try_wait()? {
                break status;
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() > limit {
                    warn!(program, ?limit, "timeout reached, killing child");
                    child.kill().ok();
                    child.wait().ok();
                    for handle in readers {
                        handle.join().ok();
                    }
                    return Err(ProcessError::TimedOut {
                        program: program.to_string(),
                        limit,
                    });
                }
            }

            thread::sleep(POLL_INTERVAL);
        };

        for handle in readers {
            handle.join().ok();
        }
        // Readers are done and their senders dropped; drain what is left.
        while let Ok((stream, line)) = rx.try_recv() {
            self.push_line(&mut output, stream, line);
        }

        match status.code() {
            Some(code) => {
                debug!(program, code, "child exited");
                output.exit_code = code;
                Ok(output)
            }
            None => Err(ProcessError::Crashed(program.to_string())),
        }
    }

    /// Run and require exit code 0, the only success guarantee the external
    /// tools give us. On nonzero exit the error carries the stderr tail.
    pub fn run_ok<S: AsRef<OsStr>>(
        &mut self,
        program: &str,
        args: &[S],
    ) -> Result<ProcessOutput, ProcessError> {
        let output = self.run(program, args)?;
        if output.exit_code != 0 {
            return Err(ProcessError::Failed {
                program: program.to_string(),
                code: output.exit_code,
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(output)
    }

    fn push_line(&mut self, output: &mut ProcessOutput, stream: Stream, line: String) {
        if let Some(callback) = &mut self.on_line {
            callback(&line);
        }
        let buffer = match stream {
            Stream::Stdout => &mut output.stdout,
            Stream::Stderr => &mut output.stderr,
        };
        buffer.push_str(&line);
        buffer.push('\n');
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    stream: Stream,
    tx: Sender<(Stream, String)>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(pipe).lines() {
            match line {
                Ok(line) => {
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

/// Last few stderr lines, enough to say what went wrong without dumping a
/// full extraction log into the error message.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_run_captures_stdout_and_stderr() {
        let output = ProcessRunner::new()
            .run("sh", &["-c", "echo out; echo err >&2"])
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn test_run_reports_nonzero_exit_without_error() {
        let output = ProcessRunner::new().run("sh", &["-c", "exit 3"]).unwrap();
        assert_eq!(output.exit_code, 3);
    }

    #[test]
    fn test_run_ok_fails_on_nonzero_exit() {
        let err = ProcessRunner::new()
            .run_ok("sh", &["-c", "echo broken >&2; exit 2"])
            .unwrap_err();
        match err {
            ProcessError::Failed { code, stderr, .. } => {
                assert_eq!(code, 2);
                assert!(stderr.contains("broken"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_binary_is_tool_not_found() {
        let err = ProcessRunner::new()
            .run("crowbar-no-such-tool", &["x"])
            .unwrap_err();
        assert!(matches!(err, ProcessError::ToolNotFound(_)));
    }

    #[test]
    fn test_timeout_kills_child() {
        let err = ProcessRunner::new()
            .timeout(Duration::from_millis(200))
            .run("sh", &["-c", "sleep 10"])
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[test]
    fn test_signal_death_is_crashed() {
        let err = ProcessRunner::new()
            .run("sh", &["-c", "kill -9 $$"])
            .unwrap_err();
        assert!(matches!(err, ProcessError::Crashed(_)));
    }

    #[test]
    fn test_on_line_sees_output() {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&lines);
        ProcessRunner::new()
            .on_line(move |line| sink.borrow_mut().push(line.to_string()))
            .run("sh", &["-c", "echo one; echo two"])
            .unwrap();
        assert_eq!(*lines.borrow(), vec!["one", "two"]);
    }

    #[test]
    fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = ProcessRunner::new()
            .working_dir(dir.path())
            .run("sh", &["-c", "pwd"])
            .unwrap();
        let reported = output.stdout.trim();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(reported).canonicalize().unwrap(),
            expected
        );
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&long);
        assert!(tail.starts_with("line 22"));
        assert!(tail.ends_with("line 29"));
    }
}
