//! Hashing utilities for content-addressed manifests and restore verification.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `hash_file()`: streaming hash of a file's raw bytes
//! - `hash_manifest_file()`: hash with optional end-of-line normalization
//! - `hash_bytes()`: arbitrary byte hashing
//! - `HashingReader`: hashes whatever passes through it

use std::borrow::Cow;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Extensions whose contents are treated as text for EOL normalization.
const TEXT_EXTENSIONS: &[&str] = &[
  "py", "sh", "md", "txt", "service", "json", "yml", "yaml", "toml", "ini", "cfg",
];

/// File names treated as text regardless of extension.
const TEXT_NAMES: &[&str] = &["requirements.txt", "Dockerfile", "Makefile"];

/// A full 64-character SHA256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Error)]
#[error("failed to read file {path}: {source}")]
pub struct HashError {
  pub path: PathBuf,
  #[source]
  pub source: io::Error,
}

/// Whether a relative path names a text file, by extension or well-known name.
pub fn is_text_path(rel_path: &str) -> bool {
  let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
  if TEXT_NAMES.contains(&name) {
    return true;
  }
  match name.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
    _ => false,
  }
}

/// Rewrite `\r\n` and lone `\r` to `\n`.
///
/// Borrows when the input has no carriage returns.
pub fn normalize_eol(data: &[u8]) -> Cow<'_, [u8]> {
  if !data.contains(&b'\r') {
    return Cow::Borrowed(data);
  }

  let mut out = Vec::with_capacity(data.len());
  let mut iter = data.iter().peekable();
  while let Some(&byte) = iter.next() {
    if byte == b'\r' {
      if iter.peek() == Some(&&b'\n') {
        iter.next();
      }
      out.push(b'\n');
    } else {
      out.push(byte);
    }
  }
  Cow::Owned(out)
}

/// Hash a file for a manifest entry.
///
/// Returns the on-disk size together with the digest. When `normalize` is
/// set the whole file is read and its line endings normalized before
/// hashing; otherwise the file is streamed.
pub fn hash_manifest_file(path: &Path, normalize: bool) -> Result<(u64, ContentHash), HashError> {
  if !normalize {
    return hash_file(path);
  }

  let data = fs::read(path).map_err(|source| HashError {
    path: path.to_path_buf(),
    source,
  })?;
  Ok((data.len() as u64, hash_bytes(&normalize_eol(&data))))
}

/// Hash a file's contents.
///
/// Returns the number of bytes read and the full SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<(u64, ContentHash), HashError> {
  let err = |source| HashError {
    path: path.to_path_buf(),
    source,
  };
  let mut file = fs::File::open(path).map_err(err)?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];
  let mut total = 0u64;

  loop {
    let bytes_read = file.read(&mut buffer).map_err(err)?;
    if bytes_read == 0 {
      break;
    }
    total += bytes_read as u64;
    hasher.update(&buffer[..bytes_read]);
  }

  Ok((total, ContentHash(hex::encode(hasher.finalize()))))
}

/// A reader that hashes every byte read through it.
pub struct HashingReader<R> {
  inner: R,
  hasher: Sha256,
  total: u64,
}

impl<R: Read> HashingReader<R> {
  pub fn new(inner: R) -> Self {
    HashingReader {
      inner,
      hasher: Sha256::new(),
      total: 0,
    }
  }

  /// Bytes read so far and their digest.
  pub fn finish(self) -> (u64, ContentHash) {
    (self.total, ContentHash(hex::encode(self.hasher.finalize())))
  }
}

impl<R: Read> Read for HashingReader<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    let n = self.inner.read(buf)?;
    self.hasher.update(&buf[..n]);
    self.total += n as u64;
    Ok(n)
  }
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}
