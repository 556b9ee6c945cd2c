use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::{FileTransport, TransportError};
use crate::registry::RemoteSettings;
use crate::util::process::run_with_timeout;

/// Copies files with `scp` in batch mode, bounded by a per-call timeout.
#[derive(Debug, Clone)]
pub struct ScpTransport {
  host: String,
  user: Option<String>,
  port: Option<u16>,
  identity: Option<PathBuf>,
  timeout: Duration,
}

impl ScpTransport {
  pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
    ScpTransport {
      host: host.into(),
      user: None,
      port: None,
      identity: None,
      timeout,
    }
  }

  pub fn from_settings(host: &str, settings: &RemoteSettings) -> Self {
    ScpTransport {
      host: host.to_string(),
      user: settings.user.clone(),
      port: settings.port,
      identity: settings.identity.clone(),
      timeout: settings.timeout(),
    }
  }

  fn destination(&self) -> String {
    match &self.user {
      Some(user) => format!("{user}@{}", self.host),
      None => self.host.clone(),
    }
  }

  /// `scp` argv up to (not including) the source and target operands.
  fn base_args(&self) -> Vec<String> {
    let mut argv = vec![
      "scp".to_string(),
      "-B".to_string(),
      "-q".to_string(),
      "-o".to_string(),
      format!("ConnectTimeout={}", self.timeout.as_secs().max(1)),
    ];
    if let Some(port) = self.port {
      argv.push("-P".to_string());
      argv.push(port.to_string());
    }
    if let Some(identity) = &self.identity {
      argv.push("-i".to_string());
      argv.push(identity.display().to_string());
    }
    argv
  }

  fn copy(&self, op: &'static str, remote: &str, from: String, to: String) -> Result<(), TransportError> {
    let mut argv = self.base_args();
    argv.push(from);
    argv.push(to);

    debug!(op, remote, host = %self.host, "running scp");
    let output = run_with_timeout(&argv, None, self.timeout).map_err(|source| TransportError::Process {
      op,
      path: remote.to_string(),
      source,
    })?;

    if output.success {
      return Ok(());
    }
    if output.stderr.contains("No such file or directory") {
      return Err(TransportError::NotFound {
        path: remote.to_string(),
      });
    }
    Err(TransportError::Command {
      op,
      path: remote.to_string(),
      code: output.code,
      stderr: output.stderr.trim().to_string(),
    })
  }
}

impl FileTransport for ScpTransport {
  fn describe(&self) -> String {
    self.destination()
  }

  fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
    let target = format!("{}:{remote}", self.destination());
    self.copy("upload", remote, local.display().to_string(), target)
  }

  fn download(&self, remote: &str) -> Result<Vec<u8>, TransportError> {
    let io_err = |source| TransportError::Io {
      op: "download",
      path: remote.to_string(),
      source,
    };

    let local = tempfile::NamedTempFile::new().map_err(io_err)?;
    let source = format!("{}:{remote}", self.destination());
    self.copy("download", remote, source, local.path().display().to_string())?;
    fs::read(local.path()).map_err(io_err)
  }
}
