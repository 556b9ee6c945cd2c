//! Deploy archive extraction and repo-root detection.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use super::DeployError;
use crate::registry::Registry;

/// How deep below the unpack directory the repo root may sit.
const MAX_ROOT_DEPTH: usize = 3;

/// Unpack `archive` into the existing directory `dest`.
///
/// Supports `.tar.gz` / `.tgz` and `.tar`. Entries that would land outside
/// `dest` are skipped by `tar`.
pub(crate) fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), DeployError> {
  let name = archive.file_name().and_then(|n| n.to_str()).unwrap_or_default();
  let unpack_err = |source| DeployError::Unpack {
    archive: archive.to_path_buf(),
    source,
  };

  let file = File::open(archive).map_err(unpack_err)?;
  let reader: Box<dyn Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    Box::new(GzDecoder::new(BufReader::new(file)))
  } else if name.ends_with(".tar") {
    Box::new(BufReader::new(file))
  } else {
    return Err(DeployError::UnsupportedArchive(archive.to_path_buf()));
  };

  Archive::new(reader).unpack(dest).map_err(unpack_err)?;
  info!(archive = %archive.display(), dest = %dest.display(), "unpacked");
  Ok(())
}

/// Find the directory holding the most registered component folders.
///
/// Searched breadth-first to a bounded depth, so an archive may wrap the
/// repo in any folder name. Ties go to the shallowest candidate.
pub(crate) fn find_repo_root(staged: &Path, registry: &Registry) -> io::Result<Option<PathBuf>> {
  let mut best: Option<(usize, PathBuf)> = None;
  let mut queue = VecDeque::from([(staged.to_path_buf(), 0usize)]);

  while let Some((dir, depth)) = queue.pop_front() {
    let score = registry
      .components()
      .iter()
      .filter(|c| dir.join(&c.code_root).is_dir())
      .count();
    debug!(dir = %dir.display(), score, "repo root candidate");
    if score > best.as_ref().map_or(0, |(s, _)| *s) {
      best = Some((score, dir.clone()));
    }

    if depth == MAX_ROOT_DEPTH {
      continue;
    }
    let mut children: Vec<PathBuf> = fs::read_dir(&dir)?
      .filter_map(Result::ok)
      .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
      .map(|e| e.path())
      .collect();
    children.sort();
    queue.extend(children.into_iter().map(|child| (child, depth + 1)));
  }

  Ok(best.map(|(_, dir)| dir))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_tree;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use tempfile::TempDir;

  fn registry() -> Registry {
    Registry::from_toml(
      r#"
root = "/srv/fleet"
orchestrator = "admin"
[preserve]
patterns = ["*.json"]
[[component]]
name = "admin"
[[component]]
name = "forwarder"
[[component]]
name = "onboarding"
"#,
      Path::new("/"),
    )
    .unwrap()
  }

  fn tar_gz(src: &Path, out: &Path) {
    let file = File::create(out).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all(".", src).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
  }

  #[test]
  fn unpacks_tar_gz() {
    let temp = TempDir::new().unwrap();
    write_tree(&temp.path().join("src"), &[("admin/admin.py", "print(1)")]);
    let archive = temp.path().join("deploy.tar.gz");
    tar_gz(&temp.path().join("src"), &archive);
    let dest = temp.path().join("out");
    fs::create_dir(&dest).unwrap();

    unpack_archive(&archive, &dest).unwrap();

    assert_eq!(fs::read_to_string(dest.join("admin/admin.py")).unwrap(), "print(1)");
  }

  #[test]
  fn rejects_unknown_extension() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("deploy.zip");
    fs::write(&archive, b"PK").unwrap();
    assert!(matches!(
      unpack_archive(&archive, temp.path()),
      Err(DeployError::UnsupportedArchive(_))
    ));
  }

  #[test]
  fn corrupt_archive_is_unpack_error() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("deploy.tgz");
    fs::write(&archive, b"definitely not gzip").unwrap();
    assert!(matches!(
      unpack_archive(&archive, temp.path()),
      Err(DeployError::Unpack { .. })
    ));
  }

  #[test]
  fn finds_wrapped_repo_root() {
    let temp = TempDir::new().unwrap();
    write_tree(
      temp.path(),
      &[
        ("mirror-world/admin/admin.py", ""),
        ("mirror-world/forwarder/forwarder.py", ""),
        ("mirror-world/docs/admin/readme.md", ""),
      ],
    );

    let root = find_repo_root(temp.path(), &registry()).unwrap();

    assert_eq!(root, Some(temp.path().join("mirror-world")));
  }

  #[test]
  fn prefers_shallowest_on_tie() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("admin/a.py", ""), ("nested/forwarder/f.py", "")]);

    let root = find_repo_root(temp.path(), &registry()).unwrap();

    assert_eq!(root, Some(temp.path().to_path_buf()));
  }

  #[test]
  fn none_when_no_component_present() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("random/file.txt", "")]);
    assert_eq!(find_repo_root(temp.path(), &registry()).unwrap(), None);
  }
}
