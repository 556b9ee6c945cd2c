use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use super::rule::IncludeRule;
use super::types::{Manifest, ManifestEntry, ManifestError};
use crate::util::fs::relative_slash_path;
use crate::util::hash::{hash_manifest_file, is_text_path};

/// Build a manifest of every included regular file under `root`.
///
/// # Behavior
///
/// - Symlinks are never followed and never recorded; special files are skipped.
/// - Text files (by extension) have `\r\n` / `\r` rewritten to `\n` before
///   hashing when `normalize_text_eol` is set. `size` is always the on-disk size.
/// - Any unreadable file or directory fails the whole build. No partial
///   manifest is ever returned.
///
/// The walk is read-only and not transactional: a file changing mid-walk
/// yields a best-effort manifest.
pub fn build(root: &Path, rule: &IncludeRule, normalize_text_eol: bool) -> Result<Manifest, ManifestError> {
  if !root.is_dir() {
    return Err(ManifestError::RootNotDirectory {
      path: root.to_path_buf(),
    });
  }

  let rule = rule.matcher().map_err(ManifestError::InvalidRule)?;

  let walker = WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      e.depth() == 0 || !e.file_type().is_dir() || !e.file_name().to_str().is_some_and(|name| rule.skips_dir(name))
    });

  let mut files = BTreeMap::new();

  for entry in walker {
    let entry = entry.map_err(|e| ManifestError::Walk {
      path: e.path().unwrap_or(root).to_path_buf(),
      message: e.to_string(),
    })?;

    let file_type = entry.file_type();
    if file_type.is_dir() {
      continue;
    }
    if file_type.is_symlink() {
      debug!(path = %entry.path().display(), "skipping symlink");
      continue;
    }
    if !file_type.is_file() {
      debug!(path = %entry.path().display(), "skipping special file");
      continue;
    }

    let rel = relative_slash_path(root, entry.path()).ok_or_else(|| ManifestError::NonUtf8Path {
      path: entry.path().to_path_buf(),
    })?;
    if !rule.includes(&rel) {
      continue;
    }

    let is_text = is_text_path(&rel);
    let (size, content_hash) =
      hash_manifest_file(entry.path(), is_text && normalize_text_eol).map_err(|e| ManifestError::ReadFile {
        path: e.path,
        source: e.source,
      })?;

    files.insert(
      rel.clone(),
      ManifestEntry {
        path: rel,
        size,
        content_hash,
        is_text,
      },
    );
  }

  info!(root = %root.display(), files = files.len(), "manifest built");
  Ok(Manifest::from_entries(root, normalize_text_eol, files))
}
