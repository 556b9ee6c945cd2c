//! Small filesystem helpers shared by the update paths.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

/// Serialize `value` as pretty JSON and write it atomically.
///
/// Writes to `<path>.tmp` first and renames over the destination, so readers
/// see either the old file or the new one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
  let content = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
  write_atomic(path, &content)
}

/// Write bytes atomically via a sibling temp file and rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent)?;
  }

  let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
  temp_name.push(".tmp");
  let temp_path = path.with_file_name(temp_name);

  let mut file = fs::File::create(&temp_path)?;
  file.write_all(content)?;
  file.sync_all()?;
  drop(file);

  fs::rename(&temp_path, path)
}

/// Copy the tree under `src` into the existing directory `dest`.
///
/// Symlinks are recreated as symlinks on Unix and skipped elsewhere; special
/// files are skipped. Returns the number of regular files copied.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<usize> {
  let mut copied = 0;

  for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
      copied += 1;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
    } else {
      debug!(path = %entry.path().display(), "skipping special file");
    }
  }

  Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
  let link = fs::read_link(src)?;
  std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dest: &Path) -> io::Result<()> {
  debug!(path = %src.display(), "skipping symlink");
  Ok(())
}

/// Forward-slash relative path of `path` under `root`, if it is valid UTF-8.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  let mut parts = Vec::new();
  for component in rel.components() {
    parts.push(component.as_os_str().to_str()?);
  }
  Some(parts.join("/"))
}
