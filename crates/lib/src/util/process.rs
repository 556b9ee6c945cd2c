//! Child processes and blocking I/O with a hard timeout.
//!
//! The library API is synchronous. Each call builds a current-thread tokio
//! runtime so `tokio::time::timeout` can bound the work. A child is killed
//! when the timeout elapses; a blocking worker is abandoned instead.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::error::ErrorClass;

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("command is empty")]
  EmptyCommand,

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("{program} did not finish within {}s", .timeout.as_secs())]
  Timeout { program: String, timeout: Duration },

  #[error("failed to create process runtime: {0}")]
  Runtime(#[source] io::Error),
}

impl ProcessError {
  pub fn class(&self) -> ErrorClass {
    match self {
      ProcessError::Timeout { .. } => ErrorClass::TransientIo,
      ProcessError::EmptyCommand => ErrorClass::Config,
      ProcessError::Spawn { .. } | ProcessError::Runtime(_) => ErrorClass::Io,
    }
  }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub code: Option<i32>,
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
}

/// Run `argv[0]` with the remaining arguments, killing it after `timeout`.
///
/// A non-zero exit is not an error here; callers inspect `success`.
pub fn run_with_timeout(argv: &[String], cwd: Option<&Path>, timeout: Duration) -> Result<CommandOutput, ProcessError> {
  let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .map_err(ProcessError::Runtime)?;

  debug!(program = %program, args = ?args, "spawning process");

  runtime.block_on(async {
    let mut command = Command::new(program);
    command
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if let Some(dir) = cwd {
      command.current_dir(dir);
    }

    let output = match tokio::time::timeout(timeout, command.output()).await {
      Ok(result) => result.map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
      })?,
      Err(_) => {
        return Err(ProcessError::Timeout {
          program: program.clone(),
          timeout,
        });
      }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    Ok(CommandOutput {
      code: output.status.code(),
      success: output.status.success(),
      stdout,
      stderr,
    })
  })
}

/// Run blocking `work` on a worker thread, giving up after `timeout`.
///
/// Expiry is reported as `io::ErrorKind::TimedOut`. The worker cannot be
/// interrupted and keeps running detached until `work` returns.
pub fn run_blocking_with_timeout<T, F>(timeout: Duration, work: F) -> io::Result<T>
where
  T: Send + 'static,
  F: FnOnce() -> io::Result<T> + Send + 'static,
{
  let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

  let result = runtime.block_on(async {
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
      Ok(Ok(result)) => result,
      Ok(Err(join)) => Err(io::Error::other(join)),
      Err(_) => Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("blocking operation did not finish within {timeout:?}"),
      )),
    }
  });

  // dropping the runtime would wait for a stuck worker
  runtime.shutdown_background();
  result
}
