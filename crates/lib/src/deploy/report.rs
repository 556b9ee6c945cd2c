use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::error;

use crate::bootstrap::BootstrapReport;
use crate::error::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
  Baseline,
  Bootstrap,
  Units,
}

impl fmt::Display for DeployStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      DeployStep::Baseline => "baseline",
      DeployStep::Bootstrap => "bootstrap",
      DeployStep::Units => "units",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ComponentOutcome {
  Replaced { created: bool, preserved: usize },
  /// Orchestrator update staged; applied on its next start.
  Staged { staging_dir: String, changes: Option<usize> },
  Skipped { reason: String },
  Failed { class: ErrorClass, error: String },
}

impl ComponentOutcome {
  pub(crate) fn failed(class: ErrorClass, error: &dyn fmt::Display) -> Self {
    ComponentOutcome::Failed {
      class,
      error: error.to_string(),
    }
  }

  /// Whether the component's code changed and it needs a restart.
  pub fn is_updated(&self) -> bool {
    matches!(self, ComponentOutcome::Replaced { .. } | ComponentOutcome::Staged { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
  pub name: String,
  #[serde(flatten)]
  pub outcome: ComponentOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitsReport {
  pub installed: Vec<String>,
  pub reloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestartOutcome {
  Restarted,
  Failed { class: ErrorClass, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartReport {
  pub name: String,
  pub service: String,
  #[serde(flatten)]
  pub outcome: RestartOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Abort {
  pub step: DeployStep,
  pub class: ErrorClass,
  pub error: String,
}

/// What a deploy did, component by component and step by step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
  pub archive: String,
  pub root: String,
  pub components: Vec<ComponentReport>,
  /// Id of the baseline recorded after the update.
  pub baseline: Option<String>,
  pub bootstrap: Option<BootstrapReport>,
  pub units: Option<UnitsReport>,
  pub restarts: Vec<RestartReport>,
  pub aborted_at: Option<Abort>,
}

impl DeployReport {
  pub(crate) fn new(archive: &Path, root: &Path) -> Self {
    DeployReport {
      archive: archive.display().to_string(),
      root: root.display().to_string(),
      components: Vec::new(),
      baseline: None,
      bootstrap: None,
      units: None,
      restarts: Vec::new(),
      aborted_at: None,
    }
  }

  pub(crate) fn abort(mut self, step: DeployStep, class: ErrorClass, error: impl fmt::Display) -> Self {
    error!(step = %step, class = %class, error = %error, "deploy aborted");
    self.aborted_at = Some(Abort {
      step,
      class,
      error: error.to_string(),
    });
    self
  }

  pub fn component(&self, name: &str) -> Option<&ComponentOutcome> {
    self.components.iter().find(|c| c.name == name).map(|c| &c.outcome)
  }

  /// Names of components whose code changed.
  pub fn updated(&self) -> impl Iterator<Item = &str> {
    self
      .components
      .iter()
      .filter(|c| c.outcome.is_updated())
      .map(|c| c.name.as_str())
  }

  pub fn failed_components(&self) -> impl Iterator<Item = &ComponentReport> {
    self
      .components
      .iter()
      .filter(|c| matches!(c.outcome, ComponentOutcome::Failed { .. }))
  }

  pub fn is_success(&self) -> bool {
    self.aborted_at.is_none()
      && self.failed_components().next().is_none()
      && self
        .restarts
        .iter()
        .all(|r| r.outcome == RestartOutcome::Restarted)
  }
}
