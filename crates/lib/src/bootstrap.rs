//! Shared runtime environment check and repair.
//!
//! Components share one interpreter environment. A deploy checks it and, if
//! the check fails, recreates it and checks again. Safe to run every deploy.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::ErrorClass;
use crate::registry::EnvironmentSettings;
use crate::util::process::{ProcessError, run_with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapReport {
  /// The check passed; nothing was changed.
  Healthy,
  /// The check failed, the environment was rebuilt and now passes.
  Recreated,
  /// No environment is configured.
  Skipped,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
  #[error("environment {step} could not run: {source}")]
  Process {
    step: &'static str,
    #[source]
    source: ProcessError,
  },

  #[error("environment recreate failed with code {code:?}: {stderr}")]
  RecreateFailed { code: Option<i32>, stderr: String },

  #[error("environment still unusable after recreate: {stderr}")]
  StillBroken { stderr: String },
}

impl BootstrapError {
  pub fn class(&self) -> ErrorClass {
    match self {
      BootstrapError::Process { source, .. } => source.class(),
      BootstrapError::RecreateFailed { .. } | BootstrapError::StillBroken { .. } => ErrorClass::Fatal,
    }
  }
}

pub trait EnvironmentBootstrap {
  /// Make sure the environment is usable. Idempotent.
  fn ensure(&self) -> Result<BootstrapReport, BootstrapError>;
}

/// For fleets without a shared environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBootstrap;

impl EnvironmentBootstrap for NoBootstrap {
  fn ensure(&self) -> Result<BootstrapReport, BootstrapError> {
    Ok(BootstrapReport::Skipped)
  }
}

/// Check with one command, repair with another.
#[derive(Debug, Clone)]
pub struct CommandBootstrap {
  check: Vec<String>,
  recreate: Vec<String>,
  timeout: Duration,
}

impl CommandBootstrap {
  pub fn new(check: Vec<String>, recreate: Vec<String>, timeout: Duration) -> Self {
    CommandBootstrap {
      check,
      recreate,
      timeout,
    }
  }

  pub fn from_settings(settings: &EnvironmentSettings) -> Self {
    Self::new(settings.check.clone(), settings.recreate.clone(), settings.timeout())
  }

  /// Returns `Ok(None)` on success, `Ok(Some(stderr))` on a failing check.
  fn check(&self) -> Result<Option<String>, BootstrapError> {
    let output = run_with_timeout(&self.check, None, self.timeout)
      .map_err(|source| BootstrapError::Process { step: "check", source })?;
    Ok((!output.success).then(|| output.stderr.trim().to_string()))
  }
}

impl EnvironmentBootstrap for CommandBootstrap {
  fn ensure(&self) -> Result<BootstrapReport, BootstrapError> {
    let Some(reason) = self.check()? else {
      info!("environment healthy");
      return Ok(BootstrapReport::Healthy);
    };

    warn!(reason = %reason, "environment check failed, recreating");
    let output = run_with_timeout(&self.recreate, None, self.timeout).map_err(|source| BootstrapError::Process {
      step: "recreate",
      source,
    })?;
    if !output.success {
      return Err(BootstrapError::RecreateFailed {
        code: output.code,
        stderr: output.stderr.trim().to_string(),
      });
    }

    if let Some(stderr) = self.check()? {
      return Err(BootstrapError::StillBroken { stderr });
    }

    info!("environment recreated");
    Ok(BootstrapReport::Recreated)
  }
}
