use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_BASELINE_KEEP;
use crate::error::ErrorClass;
use crate::manifest::IncludeRule;
use crate::preserve::{PreserveSpec, PreserveSpecError};

/// One independently deployable and restartable worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
  pub name: String,
  /// Folder name under the fleet root (and inside a deploy archive).
  pub code_root: String,
  /// Shared `[preserve]` patterns followed by the component's own.
  pub preserve: PreserveSpec,
  /// Supervisor unit name.
  pub service: String,
  /// Components that must be restarted before this one.
  pub restart_after: Vec<String>,
}

/// `[manifest]`: which files manifests cover and how text is hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestSettings {
  pub include: Vec<String>,
  pub exclude: Vec<String>,
  pub skip_dirs: Vec<String>,
  pub normalize_text_eol: bool,
  /// Primary source files, reported separately in change summaries.
  pub source_pattern: String,
}

impl Default for ManifestSettings {
  fn default() -> Self {
    let rule = IncludeRule::default();
    ManifestSettings {
      include: rule.include,
      exclude: rule.exclude,
      skip_dirs: rule.skip_dirs,
      normalize_text_eol: true,
      source_pattern: "*.py".to_string(),
    }
  }
}

impl ManifestSettings {
  pub fn rule(&self) -> IncludeRule {
    IncludeRule {
      include: self.include.clone(),
      exclude: self.exclude.clone(),
      skip_dirs: self.skip_dirs.clone(),
    }
  }
}

/// `[baseline]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaselineSettings {
  /// Baselines kept after each deploy records a new one.
  pub keep: usize,
  /// Store location; defaults to `<data_dir>/baselines`.
  pub dir: Option<PathBuf>,
}

impl Default for BaselineSettings {
  fn default() -> Self {
    BaselineSettings {
      keep: DEFAULT_BASELINE_KEEP,
      dir: None,
    }
  }
}

/// `[environment]`: the shared runtime the components run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSettings {
  /// Exits zero when the environment is usable.
  pub check: Vec<String>,
  /// Rebuilds the environment from scratch.
  pub recreate: Vec<String>,
  #[serde(default = "default_environment_timeout")]
  pub timeout_secs: u64,
}

impl EnvironmentSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_environment_timeout() -> u64 {
  600
}

/// `[services]`: how the supervisor is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
  /// Controller argv prefix; the action and unit are appended.
  pub controller: Vec<String>,
  /// Folder of unit templates inside the deploy archive.
  pub unit_source: Option<String>,
  /// Where unit templates are installed.
  pub unit_dir: PathBuf,
  pub timeout_secs: u64,
}

impl Default for ServiceSettings {
  fn default() -> Self {
    ServiceSettings {
      controller: vec!["systemctl".to_string()],
      unit_source: None,
      unit_dir: PathBuf::from("/etc/systemd/system"),
      timeout_secs: 60,
    }
  }
}

impl ServiceSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// `[remote]`: where remote manifests are fetched from.
///
/// Either `mount` (a locally mounted copy of the host) or `host` (reached
/// with `scp`) must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
  pub host: Option<String>,
  pub user: Option<String>,
  pub port: Option<u16>,
  pub identity: Option<PathBuf>,
  pub mount: Option<PathBuf>,
  pub timeout_secs: u64,
  pub attempts: u32,
}

impl Default for RemoteSettings {
  fn default() -> Self {
    RemoteSettings {
      host: None,
      user: None,
      port: None,
      identity: None,
      mount: None,
      timeout_secs: 30,
      attempts: 3,
    }
  }
}

impl RemoteSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("no registry file found (searched: {})", display_paths(.searched))]
  NotFound { searched: Vec<PathBuf> },

  #[error("failed to read registry {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid registry {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("registry declares no components")]
  NoComponents,

  #[error("duplicate component name: {0}")]
  DuplicateName(String),

  #[error("components {first} and {second} share code root {code_root}")]
  DuplicateCodeRoot {
    code_root: String,
    first: String,
    second: String,
  },

  #[error("orchestrator {0} is not a registered component")]
  UnknownOrchestrator(String),

  #[error("component {component} restarts after unknown component {dependency}")]
  UnknownDependency { component: String, dependency: String },

  #[error("component {component} cannot restart after the orchestrator, which always restarts last")]
  RestartsAfterOrchestrator { component: String },

  #[error("component {component} has invalid code root {code_root:?}; expected a single folder name")]
  InvalidCodeRoot { component: String, code_root: String },

  #[error("component {0} has an empty service name")]
  EmptyService(String),

  #[error("component {0} has no preserve patterns; runtime files would be lost on update")]
  EmptyPreserve(String),

  #[error("component {component} has an invalid preserve pattern: {source}")]
  Preserve {
    component: String,
    #[source]
    source: PreserveSpecError,
  },

  #[error("restart_after dependencies form a cycle through {0}")]
  Cycle(String),

  #[error("invalid setting {key}: {reason}")]
  InvalidSetting { key: &'static str, reason: String },
}

impl RegistryError {
  pub fn class(&self) -> ErrorClass {
    match self {
      RegistryError::Read { .. } => ErrorClass::Io,
      _ => ErrorClass::Config,
    }
  }
}

fn display_paths(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| p.display().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}
