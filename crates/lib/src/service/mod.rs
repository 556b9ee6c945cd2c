//! Typed control over the process supervisor.

mod systemd;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use systemd::SystemdController;

use crate::error::ErrorClass;
use crate::util::process::ProcessError;

/// State of a supervised unit as the supervisor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
  Active,
  Inactive,
  Failed,
  Activating,
  Deactivating,
  Unknown,
}

impl ServiceState {
  /// Map the single-word output of `systemctl is-active`.
  pub fn from_systemctl(output: &str) -> Self {
    match output.trim() {
      "active" | "reloading" => ServiceState::Active,
      "inactive" => ServiceState::Inactive,
      "failed" => ServiceState::Failed,
      "activating" => ServiceState::Activating,
      "deactivating" => ServiceState::Deactivating,
      _ => ServiceState::Unknown,
    }
  }

  pub fn is_running(self) -> bool {
    matches!(self, ServiceState::Active | ServiceState::Activating)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ServiceState::Active => "active",
      ServiceState::Inactive => "inactive",
      ServiceState::Failed => "failed",
      ServiceState::Activating => "activating",
      ServiceState::Deactivating => "deactivating",
      ServiceState::Unknown => "unknown",
    }
  }
}

impl fmt::Display for ServiceState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("{action} {unit}: {source}")]
  Process {
    action: &'static str,
    unit: String,
    #[source]
    source: ProcessError,
  },

  #[error("{action} {unit} exited with code {code:?}: {stderr}")]
  Failed {
    action: &'static str,
    unit: String,
    code: Option<i32>,
    stderr: String,
  },
}

impl ServiceError {
  pub fn class(&self) -> ErrorClass {
    match self {
      ServiceError::Process { source, .. } => source.class(),
      ServiceError::Failed { .. } => ErrorClass::Io,
    }
  }
}

/// Start, stop and inspect supervised units.
pub trait ServiceController {
  fn start(&self, unit: &str) -> Result<(), ServiceError>;

  fn stop(&self, unit: &str) -> Result<(), ServiceError>;

  fn restart(&self, unit: &str) -> Result<(), ServiceError>;

  fn status(&self, unit: &str) -> Result<ServiceState, ServiceError>;

  /// Re-read unit definitions after they changed on disk.
  fn reload_units(&self) -> Result<(), ServiceError>;
}
