//! Release archive builder.
//!
//! Packs each registered component folder, plus the unit template folder,
//! from a source checkout into a `.tar.gz` that `deploy` accepts. Anything a
//! component preserves never ships, so a release can never carry secrets or
//! overwrite runtime data; exclude globs and skip dirs are dropped too.

use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ErrorClass;
use crate::manifest::RuleMatcher;
use crate::preserve::PreserveSpec;
use crate::registry::Registry;
use crate::util::fs::relative_slash_path;
use crate::util::pattern::PatternError;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("no registered component folder under {}", .0.display())]
  NoComponents(PathBuf),

  #[error("invalid include rule: {0}")]
  Rule(#[source] PatternError),

  #[error("failed to walk {}: {message}", .path.display())]
  Walk { path: PathBuf, message: String },

  #[error("failed to add {} to the archive: {source}", .path.display())]
  Add {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write archive {}: {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl ArchiveError {
  pub fn class(&self) -> ErrorClass {
    match self {
      ArchiveError::NoComponents(_) | ArchiveError::Rule(_) => ErrorClass::Config,
      _ => ErrorClass::Io,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
  pub path: PathBuf,
  /// Code roots packed.
  pub components: Vec<String>,
  /// Code roots not present in the checkout.
  pub missing: Vec<String>,
  pub files: usize,
  /// Files left out by preserve patterns or exclude globs.
  pub excluded: usize,
}

/// Pack the registered folders of `repo_root` into a gzip tarball at `out`.
///
/// The archive is written to a temp file next to `out` and renamed into place.
pub fn build_archive(repo_root: &Path, registry: &Registry, out: &Path) -> Result<ArchiveSummary, ArchiveError> {
  let rule = registry.include_rule().matcher().map_err(ArchiveError::Rule)?;
  let mut summary = ArchiveSummary {
    path: out.to_path_buf(),
    components: Vec::new(),
    missing: Vec::new(),
    files: 0,
    excluded: 0,
  };

  let mut folders: Vec<(&str, Option<&PreserveSpec>)> = registry
    .components()
    .iter()
    .map(|c| (c.code_root.as_str(), Some(&c.preserve)))
    .collect();
  if let Some(units) = &registry.services().unit_source {
    folders.push((units.as_str(), None));
  }

  let present: Vec<_> = folders
    .into_iter()
    .filter(|(folder, spec)| {
      let found = repo_root.join(folder).is_dir();
      if !found && spec.is_some() {
        warn!(folder = %folder, "component folder missing from checkout");
        summary.missing.push(folder.to_string());
      }
      found
    })
    .collect();
  if !present.iter().any(|(_, spec)| spec.is_some()) {
    return Err(ArchiveError::NoComponents(repo_root.to_path_buf()));
  }

  let write_err = |source| ArchiveError::Write {
    path: out.to_path_buf(),
    source,
  };
  let parent = out.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  fs::create_dir_all(parent).map_err(write_err)?;
  let temp = tempfile::Builder::new()
    .prefix(".fleet-archive-")
    .tempfile_in(parent)
    .map_err(write_err)?;

  let encoder = GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
  let mut builder = tar::Builder::new(encoder);
  builder.follow_symlinks(false);

  for (folder, spec) in present {
    let (files, excluded) = append_folder(&mut builder, repo_root, folder, spec, &rule)?;
    summary.files += files;
    summary.excluded += excluded;
    if spec.is_some() {
      summary.components.push(folder.to_string());
    }
  }

  builder
    .into_inner()
    .and_then(|encoder| encoder.finish())
    .and_then(|mut writer| io::Write::flush(&mut writer))
    .map_err(write_err)?;
  temp.persist(out).map_err(|e| write_err(e.error))?;

  info!(
    archive = %out.display(),
    components = summary.components.len(),
    files = summary.files,
    excluded = summary.excluded,
    "archive built"
  );
  Ok(summary)
}

/// Add `repo_root/folder` under the archive path `folder/`.
fn append_folder<W: io::Write>(
  builder: &mut tar::Builder<W>,
  repo_root: &Path,
  folder: &str,
  spec: Option<&PreserveSpec>,
  rule: &RuleMatcher,
) -> Result<(usize, usize), ArchiveError> {
  let dir = repo_root.join(folder);
  let walker = WalkDir::new(&dir)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      e.depth() == 0 || !e.file_type().is_dir() || !e.file_name().to_str().is_some_and(|name| rule.skips_dir(name))
    });

  let (mut files, mut excluded) = (0, 0);
  for entry in walker {
    let entry = entry.map_err(|e| ArchiveError::Walk {
      path: e.path().unwrap_or(&dir).to_path_buf(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Some(rel) = relative_slash_path(&dir, entry.path()) else {
      continue;
    };

    if rule.excludes(&rel) || spec.is_some_and(|s| s.matches(&rel)) {
      debug!(folder, path = %rel, "excluded from archive");
      excluded += 1;
      continue;
    }

    builder
      .append_path_with_name(entry.path(), format!("{folder}/{rel}"))
      .map_err(|source| ArchiveError::Add {
        path: entry.path().to_path_buf(),
        source,
      })?;
    files += 1;
  }

  Ok((files, excluded))
}
