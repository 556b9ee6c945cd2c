use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::spec::PreserveSpec;
use crate::error::ErrorClass;
use crate::util::fs::relative_slash_path;
use crate::util::hash::{ContentHash, HashingReader, hash_file};

#[derive(Debug, Error)]
pub enum PreserveError {
  #[error("failed to scan {path} for preserved files: {message}")]
  Scan { path: PathBuf, message: String },

  #[error("failed to read preserved file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to create preserve store {path}: {source}")]
  CreateStore {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write preserve archive {path}: {source}")]
  Archive {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to extract preserve archive {archive} into {dest}: {source}")]
  Restore {
    archive: PathBuf,
    dest: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("preserved file {path} changed across restore: expected {expected}, found {actual}")]
  IntegrityMismatch {
    path: String,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error("preserved symlink {path} no longer points at {}", .expected.display())]
  LinkMismatch { path: String, expected: PathBuf },

  #[error("preserved file {path} is missing after restore")]
  IntegrityMissing { path: String },
}

impl PreserveError {
  pub fn class(&self) -> ErrorClass {
    match self {
      PreserveError::IntegrityMismatch { .. }
      | PreserveError::LinkMismatch { .. }
      | PreserveError::IntegrityMissing { .. } => ErrorClass::Integrity,
      _ => ErrorClass::Io,
    }
  }
}

/// What was captured for one preserved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreservedEntry {
  /// A regular file and the hash of the bytes archived.
  File(ContentHash),
  /// A symlink, kept as a link, and where it pointed.
  Symlink(PathBuf),
}

/// Preserved paths captured from a directory, stored as a tar archive
/// outside that directory, with the state of every path at capture time.
#[derive(Debug)]
pub struct PreserveArchive {
  path: PathBuf,
  entries: BTreeMap<String, PreservedEntry>,
}

impl PreserveArchive {
  /// Archive every regular file and symlink under `source` that `spec` matches.
  ///
  /// Symlinks are stored as links and never followed. Returns `Ok(None)`
  /// when nothing matches; no store is created then. File contents are
  /// hashed while they stream into the archive, so the recorded hash always
  /// describes what was stored. A failed capture leaves nothing behind in
  /// the store.
  pub fn capture(source: &Path, spec: &PreserveSpec, store_dir: &Path) -> Result<Option<Self>, PreserveError> {
    let matched = collect_matches(source, spec)?;
    if matched.is_empty() {
      debug!(source = %source.display(), "nothing to preserve");
      return Ok(None);
    }

    fs::create_dir_all(store_dir).map_err(|e| PreserveError::CreateStore {
      path: store_dir.to_path_buf(),
      source: e,
    })?;

    let label = source.file_name().and_then(|n| n.to_str()).unwrap_or("target");
    let temp = tempfile::Builder::new()
      .prefix(&format!("{label}-"))
      .suffix(".tar")
      .tempfile_in(store_dir)
      .map_err(|e| PreserveError::CreateStore {
        path: store_dir.to_path_buf(),
        source: e,
      })?;
    let path = temp.path().to_path_buf();

    let archive_err = |e: io::Error| PreserveError::Archive {
      path: path.clone(),
      source: e,
    };

    let mut builder = tar::Builder::new(BufWriter::new(temp.as_file()));
    let mut entries = BTreeMap::new();

    for found in matched {
      let entry = match found.kind {
        Found::Symlink => append_symlink(&mut builder, &found.rel, &found.path)?,
        Found::File => append_file(&mut builder, &found.rel, &found.path)?,
      };
      entries.insert(found.rel, entry);
    }

    builder
      .into_inner()
      .map_err(archive_err)?
      .into_inner()
      .map_err(|e| archive_err(e.into_error()))?;
    temp.as_file().sync_all().map_err(archive_err)?;
    temp.keep().map_err(|e| archive_err(e.error))?;

    info!(
      source = %source.display(),
      archive = %path.display(),
      paths = entries.len(),
      "preserved runtime files"
    );
    Ok(Some(PreserveArchive { path, entries }))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Relative paths captured, with their state at capture time.
  pub fn entries(&self) -> &BTreeMap<String, PreservedEntry> {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Extract every captured path over `dest`, replacing whatever is there.
  pub fn restore(&self, dest: &Path) -> Result<(), PreserveError> {
    let restore_err = |e: io::Error| PreserveError::Restore {
      archive: self.path.clone(),
      dest: dest.to_path_buf(),
      source: e,
    };

    let file = fs::File::open(&self.path).map_err(restore_err)?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(restore_err)? {
      let mut entry = entry.map_err(restore_err)?;
      let rel = entry.path().map_err(restore_err)?.into_owned();
      if !entry.header().entry_type().is_dir() {
        clear_path(&dest.join(&rel)).map_err(restore_err)?;
      }
      entry.unpack_in(dest).map_err(restore_err)?;
    }

    debug!(dest = %dest.display(), paths = self.entries.len(), "restored preserved files");
    Ok(())
  }

  /// Check every restored path under `dest` against its capture-time state.
  pub fn verify(&self, dest: &Path) -> Result<(), PreserveError> {
    for (rel, expected) in &self.entries {
      let path = dest.join(rel);
      let missing = || PreserveError::IntegrityMissing { path: rel.clone() };
      match expected {
        PreservedEntry::File(expected) => {
          if !fs::symlink_metadata(&path).is_ok_and(|m| m.is_file()) {
            return Err(missing());
          }
          let (_, actual) = hash_file(&path).map_err(|e| PreserveError::Read {
            path: e.path,
            source: e.source,
          })?;
          if &actual != expected {
            return Err(PreserveError::IntegrityMismatch {
              path: rel.clone(),
              expected: expected.clone(),
              actual,
            });
          }
        }
        PreservedEntry::Symlink(expected) => match fs::read_link(&path) {
          Ok(actual) if &actual == expected => {}
          Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(missing()),
          _ => {
            return Err(PreserveError::LinkMismatch {
              path: rel.clone(),
              expected: expected.clone(),
            });
          }
        },
      }
    }
    Ok(())
  }

  /// Delete the archive file.
  pub fn discard(self) {
    if let Err(e) = fs::remove_file(&self.path) {
      warn!(archive = %self.path.display(), error = %e, "failed to delete preserve archive");
    }
  }
}

enum Found {
  File,
  Symlink,
}

struct Candidate {
  rel: String,
  path: PathBuf,
  kind: Found,
}

fn append_file<W: io::Write>(builder: &mut tar::Builder<W>, rel: &str, path: &Path) -> Result<PreservedEntry, PreserveError> {
  let read_err = |source| PreserveError::Read {
    path: path.to_path_buf(),
    source,
  };
  let file = fs::File::open(path).map_err(read_err)?;
  let metadata = file.metadata().map_err(read_err)?;
  let size = metadata.len();

  let mut header = tar::Header::new_gnu();
  header.set_metadata(&metadata);
  let mut reader = HashingReader::new(file.take(size));
  builder
    .append_data(&mut header, rel, &mut reader)
    .map_err(|source| PreserveError::Archive {
      path: path.to_path_buf(),
      source,
    })?;

  let (read, hash) = reader.finish();
  if read != size {
    return Err(read_err(io::Error::new(
      io::ErrorKind::UnexpectedEof,
      format!("file shrank from {size} to {read} bytes while being preserved"),
    )));
  }
  Ok(PreservedEntry::File(hash))
}

fn append_symlink<W: io::Write>(
  builder: &mut tar::Builder<W>,
  rel: &str,
  path: &Path,
) -> Result<PreservedEntry, PreserveError> {
  let read_err = |source| PreserveError::Read {
    path: path.to_path_buf(),
    source,
  };
  let target = fs::read_link(path).map_err(read_err)?;
  let metadata = fs::symlink_metadata(path).map_err(read_err)?;

  let mut header = tar::Header::new_gnu();
  header.set_metadata(&metadata);
  header.set_entry_type(tar::EntryType::Symlink);
  header.set_size(0);
  builder
    .append_link(&mut header, rel, &target)
    .map_err(|source| PreserveError::Archive {
      path: path.to_path_buf(),
      source,
    })?;
  Ok(PreservedEntry::Symlink(target))
}

/// Remove whatever occupies `path` without following symlinks.
fn clear_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Regular files and symlinks under `root` the spec matches, sorted by
/// relative path. Symlinks to directories are matched as directories but
/// never descended into.
fn collect_matches(root: &Path, spec: &PreserveSpec) -> Result<Vec<Candidate>, PreserveError> {
  let mut matched = Vec::new();
  if spec.is_empty() {
    return Ok(matched);
  }

  for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(|e| PreserveError::Scan {
      path: e.path().unwrap_or(root).to_path_buf(),
      message: e.to_string(),
    })?;
    let file_type = entry.file_type();
    let kind = if file_type.is_file() {
      Found::File
    } else if file_type.is_symlink() && entry.depth() > 0 {
      Found::Symlink
    } else {
      continue;
    };
    let Some(rel) = relative_slash_path(root, entry.path()) else {
      warn!(path = %entry.path().display(), "skipping non UTF-8 path");
      continue;
    };
    let is_dir = matches!(kind, Found::Symlink) && entry.path().is_dir();
    if spec.matches_entry(&rel, is_dir) {
      matched.push(Candidate {
        rel,
        path: entry.path().to_path_buf(),
        kind,
      });
    }
  }

  Ok(matched)
}
