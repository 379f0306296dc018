//! Runners for the decode harness that consumes mutated buffers.
//!
//! The harness is an external collaborator: it receives a byte buffer, tries to decode
//! it, and either returns or crashes. These executors only classify that outcome.

use crate::input::Input;
use log::{debug, error, warn};
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Placeholder in a target command line that is replaced by the input file path.
pub const INPUT_FILE_PLACEHOLDER: &str = "@@";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// The target returned normally with a non-zero exit code (a rejected input, not a bug).
    Exited(i32),
    Timeout,
    Crash(String),
    Other(String),
}

impl ExecutionStatus {
    pub fn is_crash(&self) -> bool {
        matches!(self, ExecutionStatus::Crash(_))
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Target command is empty")]
    EmptyCommand,
    #[error("File input delivery needs a '@@' argument in the target command")]
    MissingPlaceholder,
}

pub trait Executor<I: Input> {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus;
}

/// Runs a harness function in the current process, turning panics into crashes.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<I: Input, F> Executor<I> for InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus {
        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness_fn)(input.as_bytes());
        }));

        match result {
            Ok(_) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    StdIn,
    /// Write the input to a temporary file and substitute its path for `@@`.
    File,
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Runs an external harness binary once per input, AFL style.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Result<Self, ExecutorError> {
        if config.command.is_empty() {
            return Err(ExecutorError::EmptyCommand);
        }
        if config.input_delivery == InputDelivery::File
            && !config
                .command
                .iter()
                .any(|arg| arg.contains(INPUT_FILE_PLACEHOLDER))
        {
            return Err(ExecutorError::MissingPlaceholder);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    fn wait_with_timeout(&self, mut child: Child) -> Result<ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > self.config.timeout {
                        warn!("Target timed out after {:?}, killing", self.config.timeout);
                        return Err(kill_and_reap(&mut child));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    error!("Error waiting for child process: {e}");
                    return Err(ExecutionStatus::Other(format!(
                        "Error waiting for child: {e}",
                    )));
                }
            }
        }
    }
}

/// Kills a timed-out child and collects its exit status.
fn kill_and_reap(child: &mut Child) -> ExecutionStatus {
    match child.kill() {
        Ok(()) => {
            let _ = child.wait();
            ExecutionStatus::Timeout
        }
        Err(e) => {
            error!("Failed to kill child process: {e}");
            // Never blocks; reaps the child if it exited on its own.
            let _ = child.try_wait();
            ExecutionStatus::Other(format!("Failed to kill timed-out process: {e}"))
        }
    }
}

/// Feeds `bytes` to the child's stdin on a separate thread so a target that never reads
/// cannot stall the timeout. A closed pipe is not an error.
fn spawn_stdin_writer(mut stdin: ChildStdin, bytes: Vec<u8>) -> JoinHandle<std::io::Result<()>> {
    std::thread::spawn(move || match stdin.write_all(&bytes) {
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
        _ => Ok(()),
    })
}

fn classify_exit(status: ExitStatus) -> ExecutionStatus {
    if status.success() {
        return ExecutionStatus::Ok;
    }
    if let Some(code) = status.code() {
        return ExecutionStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionStatus::Crash(format!("Terminated by signal {signal}"));
        }
    }
    ExecutionStatus::Crash("Exited abnormally".to_string())
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus {
        // Kept alive until the child has exited.
        let mut temp_file: Option<tempfile::NamedTempFile> = None;

        let args: Vec<String> = match self.config.input_delivery {
            InputDelivery::StdIn => self.config.command[1..].to_vec(),
            InputDelivery::File => {
                let mut file = match tempfile::NamedTempFile::new() {
                    Ok(f) => f,
                    Err(e) => {
                        return ExecutionStatus::Other(format!("Failed to create temp file: {e}"));
                    }
                };
                if let Err(e) = file.write_all(input.as_bytes()).and_then(|_| file.flush()) {
                    return ExecutionStatus::Other(format!(
                        "Failed to write to temp file {:?}: {}",
                        file.path(),
                        e
                    ));
                }
                let path_str = match file.path().to_str() {
                    Some(s) => s.to_string(),
                    None => {
                        return ExecutionStatus::Other(
                            "Temp file path is not valid UTF-8".to_string(),
                        );
                    }
                };
                temp_file = Some(file);
                self.config.command[1..]
                    .iter()
                    .map(|arg| arg.replace(INPUT_FILE_PLACEHOLDER, &path_str))
                    .collect()
            }
        };

        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&args);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(match self.config.input_delivery {
            InputDelivery::StdIn => Stdio::piped(),
            InputDelivery::File => Stdio::null(),
        });
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error_msg =
                    format!("Failed to spawn command '{:?}': {}", self.config.command, e);
                error!("{error_msg}");
                return ExecutionStatus::Other(error_msg);
            }
        };

        let writer = child
            .stdin
            .take()
            .map(|stdin| spawn_stdin_writer(stdin, input.as_bytes().to_vec()));

        let mut status = match self.wait_with_timeout(child) {
            Ok(exit_status) => classify_exit(exit_status),
            Err(status) => status,
        };

        if let Some(writer) = writer {
            // After a timeout a grandchild may still hold the pipe open; leave the
            // writer to finish on its own instead of blocking on it.
            if status == ExecutionStatus::Timeout && !writer.is_finished() {
                debug!("Leaving stdin writer of timed-out target detached");
            } else {
                match writer.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Error writing to child stdin: {e}");
                        if status == ExecutionStatus::Ok {
                            status =
                                ExecutionStatus::Other(format!("Failed to write to stdin: {e}"));
                        }
                    }
                    Err(_) => {
                        status =
                            ExecutionStatus::Other("Stdin writer thread panicked".to_string());
                    }
                }
            }
        }
        drop(temp_file);
        status
    }
}

#[cfg(test)]
mod in_process_executor_tests {
    use super::*;

    fn simple_harness(data: &[u8]) {
        let _ = data;
    }

    fn panicking_harness(data: &[u8]) {
        if data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0 {
            panic!("Boom!");
        }
    }

    #[test]
    fn in_process_executor_runs_harness() {
        let mut executor = InProcessExecutor::new(simple_harness);
        let input_data: Vec<u8> = vec![1, 2, 3];
        let status = executor.execute_sync(&input_data);
        assert_eq!(status, ExecutionStatus::Ok);
    }

    #[test]
    fn in_process_executor_catches_panic() {
        let mut executor = InProcessExecutor::new(panicking_harness);
        let crashing_input: Vec<u8> = vec![0xFF, 0xFB];
        let status = executor.execute_sync(&crashing_input);
        assert!(status.is_crash());
        match status {
            ExecutionStatus::Crash(msg) => assert!(msg.contains("Boom!")),
            _ => panic!("Expected a crash, got {status:?}"),
        }
    }

    #[test]
    fn in_process_executor_reports_formatted_panics() {
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            if !data.is_empty() {
                panic!("decoder read past frame of {} bytes", data.len());
            }
        });
        let status = executor.execute_sync(&vec![0u8; 4]);
        assert_eq!(
            status,
            ExecutionStatus::Crash("decoder read past frame of 4 bytes".to_string())
        );
    }
}
