use serde::{Deserialize, Serialize};

use crate::consts::{BACKUP_PREFIX, LAST_APPLIED_SUFFIX, PENDING_UPDATE_SUFFIX, STAGING_PREFIX};
use crate::util::pattern::{PatternError, PatternSet};

const DEFAULT_INCLUDE: &[&str] = &[
  "*.py",
  "*.sh",
  "*.md",
  "*.txt",
  "*.service",
  "requirements.txt",
  "config.json",
  "messages.json",
  "vouch_config.json",
];

const DEFAULT_EXCLUDE: &[&str] = &[
  "config.secrets.json",
  "*.key",
  "*.pem",
  "*.ppk",
  "*tokens*.txt",
  "*.db",
  "*.sqlite*",
  "*.log",
  "*.pyc",
  "*.lock",
];

const DEFAULT_SKIP_DIRS: &[&str] = &[
  "__pycache__",
  ".git",
  ".venv",
  "venv",
  "node_modules",
  ".mypy_cache",
  ".pytest_cache",
];

/// Predicate deciding which files a manifest covers.
///
/// Globs follow gitignore rules: a bare pattern matches a base name at any
/// depth, a pattern with `/` matches the relative path. A file is included
/// when no `exclude` glob covers it and an `include` glob does.
/// Directories named in `skip_dirs`, and the staging/backup side directories
/// used by updates, are never descended into. The rule is plain data so the
/// same value can be shipped to and evaluated on another host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeRule {
  pub include: Vec<String>,
  pub exclude: Vec<String>,
  pub skip_dirs: Vec<String>,
}

impl Default for IncludeRule {
  fn default() -> Self {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
    IncludeRule {
      include: owned(DEFAULT_INCLUDE),
      exclude: owned(DEFAULT_EXCLUDE),
      skip_dirs: owned(DEFAULT_SKIP_DIRS),
    }
  }
}

impl IncludeRule {
  /// A rule that includes every file and skips nothing but side directories.
  pub fn everything() -> Self {
    IncludeRule {
      include: vec!["*".to_string()],
      exclude: Vec::new(),
      skip_dirs: Vec::new(),
    }
  }

  /// Compile the globs once for a walk.
  pub fn matcher(&self) -> Result<RuleMatcher, PatternError> {
    Ok(RuleMatcher {
      include: PatternSet::new(&self.include)?,
      exclude: PatternSet::new(&self.exclude)?,
      skip_dirs: self.skip_dirs.clone(),
    })
  }
}

/// A compiled [`IncludeRule`].
#[derive(Debug, Clone)]
pub struct RuleMatcher {
  include: PatternSet,
  exclude: PatternSet,
  skip_dirs: Vec<String>,
}

impl RuleMatcher {
  pub fn includes(&self, rel_path: &str) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    if is_control_file(name) || self.excludes(rel_path) {
      return false;
    }
    self.include.covers(rel_path, false)
  }

  /// Whether an exclude glob covers the file, regardless of the include list.
  pub fn excludes(&self, rel_path: &str) -> bool {
    self.exclude.covers(rel_path, false)
  }

  pub fn skips_dir(&self, name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
      || name.starts_with(BACKUP_PREFIX)
      || self.skip_dirs.iter().any(|d| d == name)
  }
}

/// Update bookkeeping files that live next to code roots.
fn is_control_file(name: &str) -> bool {
  name.starts_with('.') && (name.ends_with(PENDING_UPDATE_SUFFIX) || name.ends_with(LAST_APPLIED_SUFFIX))
}
