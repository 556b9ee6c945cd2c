use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use super::diff::{DiffResult, ensure_no_drift};
use super::types::{
  BASELINE_INDEX_VERSION, Baseline, BaselineError, BaselineIndex, BaselineMetadata, generate_baseline_id,
};
use crate::manifest::Manifest;
use crate::util::fs::write_json_atomic;

/// Index file name.
const INDEX_FILENAME: &str = "index.json";

/// Which baselines `prune` may delete. The current baseline is always kept.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
  /// Delete baselines older than this.
  pub older_than: Option<Duration>,
  /// Always keep this many of the newest baselines.
  pub keep_latest: usize,
}

/// Manages recorded baselines on disk.
///
/// Uses atomic write operations to prevent corruption.
#[derive(Debug, Clone)]
pub struct BaselineStore {
  base_path: PathBuf,
}

impl BaselineStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  fn index_path(&self) -> PathBuf {
    self.base_path.join(INDEX_FILENAME)
  }

  fn baseline_path(&self, id: &str) -> PathBuf {
    self.base_path.join(format!("{}.json", id))
  }

  fn ensure_dir(&self) -> Result<(), BaselineError> {
    fs::create_dir_all(&self.base_path).map_err(|source| BaselineError::CreateDir {
      path: self.base_path.clone(),
      source,
    })
  }

  /// Load the baseline index.
  ///
  /// Returns an empty index if the file doesn't exist.
  pub fn load_index(&self) -> Result<BaselineIndex, BaselineError> {
    let path = self.index_path();

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BaselineIndex::new()),
      Err(source) => return Err(BaselineError::Read { path, source }),
    };

    let index: BaselineIndex = serde_json::from_str(&content).map_err(|source| BaselineError::Parse {
      path: path.clone(),
      source,
    })?;

    if index.version != BASELINE_INDEX_VERSION {
      return Err(BaselineError::UnsupportedVersion(index.version));
    }

    Ok(index)
  }

  fn save_index(&self, index: &BaselineIndex) -> Result<(), BaselineError> {
    self.ensure_dir()?;
    let path = self.index_path();
    write_json_atomic(&path, index).map_err(|source| BaselineError::Write { path, source })
  }

  pub fn current_id(&self) -> Result<Option<String>, BaselineError> {
    Ok(self.load_index()?.current)
  }

  /// Load the current baseline.
  ///
  /// Returns `Ok(None)` if nothing has been recorded yet.
  pub fn load_current(&self) -> Result<Option<Baseline>, BaselineError> {
    match self.load_index()?.current {
      Some(id) => Ok(Some(self.load(&id)?)),
      None => Ok(None),
    }
  }

  pub fn load(&self, id: &str) -> Result<Baseline, BaselineError> {
    let path = self.baseline_path(id);

    let content = fs::read_to_string(&path).map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        BaselineError::NotFound(id.to_string())
      } else {
        BaselineError::Read {
          path: path.clone(),
          source,
        }
      }
    })?;

    let baseline: Baseline =
      serde_json::from_str(&content).map_err(|source| BaselineError::Parse { path: path.clone(), source })?;
    Ok(Baseline {
      manifest: baseline.manifest.with_derived_fields(),
      ..baseline
    })
  }

  /// Record `manifest` as a new baseline and make it current.
  pub fn record(&self, manifest: Manifest, label: Option<String>) -> Result<Baseline, BaselineError> {
    self.ensure_dir()?;

    let baseline = Baseline::new(generate_baseline_id(), label, manifest);
    let path = self.baseline_path(&baseline.id);
    write_json_atomic(&path, &baseline).map_err(|source| BaselineError::Write { path, source })?;

    let mut index = self.load_index()?;
    index.add(baseline.to_metadata());
    index.current = Some(baseline.id.clone());
    self.save_index(&index)?;

    info!(id = %baseline.id, files = baseline.manifest.len(), "baseline recorded");
    Ok(baseline)
  }

  /// Point the current baseline at an existing id.
  pub fn set_current(&self, id: &str) -> Result<(), BaselineError> {
    if !self.baseline_path(id).exists() {
      return Err(BaselineError::NotFound(id.to_string()));
    }

    let mut index = self.load_index()?;
    index.set_current(id)?;
    self.save_index(&index)
  }

  /// List all baselines, oldest first.
  pub fn list(&self) -> Result<Vec<BaselineMetadata>, BaselineError> {
    Ok(self.load_index()?.baselines)
  }

  /// Delete a baseline by id. Deleting the current one clears the pointer.
  pub fn delete(&self, id: &str) -> Result<(), BaselineError> {
    let path = self.baseline_path(id);

    match fs::remove_file(&path) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(source) => return Err(BaselineError::Write { path, source }),
    }

    let mut index = self.load_index()?;
    index.remove(id);
    self.save_index(&index)
  }

  /// Delete baselines selected by `policy`, returning the deleted ids.
  pub fn prune(&self, policy: &RetentionPolicy) -> Result<Vec<String>, BaselineError> {
    let index = self.load_index()?;
    let now = Utc::now().timestamp().max(0) as u64;
    let protected_from = index.baselines.len().saturating_sub(policy.keep_latest);

    let doomed: Vec<String> = index
      .baselines
      .iter()
      .enumerate()
      .filter(|(pos, b)| {
        if *pos >= protected_from || index.current.as_deref() == Some(b.id.as_str()) {
          return false;
        }
        match policy.older_than {
          Some(age) => now.saturating_sub(b.created_at) > age.as_secs(),
          None => true,
        }
      })
      .map(|(_, b)| b.id.clone())
      .collect();

    for id in &doomed {
      debug!(id = %id, "pruning baseline");
      self.delete(id)?;
    }

    Ok(doomed)
  }

  /// Run the drift gate for `fresh` against the current baseline.
  ///
  /// Without a baseline an empty tree passes as a first deploy (`Ok(None)`);
  /// a tree with content is `MissingBaseline`.
  pub fn check(&self, fresh: &Manifest) -> Result<Option<DiffResult>, BaselineError> {
    let Some(current) = self.load_current()? else {
      if fresh.is_empty() {
        info!(root = %fresh.root, "no baseline recorded and root is empty, treating as first deploy");
        return Ok(None);
      }
      return Err(BaselineError::MissingBaseline {
        root: fresh.root.clone(),
        files: fresh.len(),
      });
    };

    debug!(baseline = %current.id, "checking live root against baseline");
    ensure_no_drift(&current.manifest, fresh).map(Some)
  }
}
