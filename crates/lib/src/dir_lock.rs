//! Directory-scoped exclusive locks.
//!
//! A replace or self-update owns its target directory for its whole
//! duration. The lock file lives next to the target, never inside it, so
//! removing and recreating the target cannot drop the lock. A second caller
//! fails fast with the holder's pid and command.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorClass;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: i64,
  pub command: String,
  pub scope: PathBuf,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "{} is locked by another process: {command} (PID {pid}, started {started_at})\n\
     If you're sure no fleet process is running, remove the lock file:\n  {}",
    .scope.display(),
    .lock_path.display()
  )]
  Contention {
    scope: PathBuf,
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "{} is locked (could not read lock metadata)\n\
     If you're sure no fleet process is running, remove the lock file:\n  {}",
    .scope.display(),
    .lock_path.display()
  )]
  ContentionUnknown { scope: PathBuf, lock_path: PathBuf },

  #[error("cannot lock {}: it has no parent directory", .0.display())]
  NoParent(PathBuf),

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

impl LockError {
  pub fn class(&self) -> ErrorClass {
    match self {
      LockError::Contention { .. } | LockError::ContentionUnknown { .. } => ErrorClass::Conflict,
      LockError::NoParent(_) => ErrorClass::Config,
      _ => ErrorClass::Io,
    }
  }
}

/// Held exclusive lock. Released when dropped.
#[derive(Debug)]
pub struct DirLock {
  file: File,
  lock_path: PathBuf,
}

impl DirLock {
  /// Lock file path for `target`: `<parent>/.<name>.lock`.
  pub fn lock_path_for(target: &Path) -> Result<PathBuf, LockError> {
    let parent = target.parent().filter(|p| !p.as_os_str().is_empty());
    match (parent, target.file_name()) {
      (Some(parent), Some(name)) => {
        let mut lock_name = std::ffi::OsString::from(".");
        lock_name.push(name);
        lock_name.push(".lock");
        Ok(parent.join(lock_name))
      }
      _ => Err(LockError::NoParent(target.to_path_buf())),
    }
  }

  /// Lock `target` through its sibling lock file.
  pub fn acquire(target: &Path, command: &str) -> Result<Self, LockError> {
    let lock_path = Self::lock_path_for(target)?;
    Self::acquire_file(&lock_path, target, command)
  }

  /// Lock an explicit lock file on behalf of `scope`.
  pub fn acquire_file(lock_path: &Path, scope: &Path, command: &str) -> Result<Self, LockError> {
    if let Some(parent) = lock_path.parent()
      && !parent.exists()
    {
      std::fs::create_dir_all(parent).map_err(LockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(lock_path)
      .map_err(LockError::OpenFile)?;

    if let Err(err) = try_lock_exclusive(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(lock_path, scope));
      }
      return Err(LockError::LockFailed(err));
    }

    Self::write_metadata(&file, command, scope)?;
    debug!(lock = %lock_path.display(), command = %command, "lock acquired");

    Ok(DirLock {
      file,
      lock_path: lock_path.to_path_buf(),
    })
  }

  /// Reads the lock metadata from the held file handle.
  ///
  /// Opening a second handle would fail on Windows due to mandatory locking.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn write_metadata(file: &File, command: &str, scope: &Path) -> Result<(), LockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: Utc::now().timestamp(),
      command: command.to_string(),
      scope: scope.to_path_buf(),
    };

    file.set_len(0).map_err(LockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(LockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path, scope: &Path) -> LockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        let started_at = DateTime::<Utc>::from_timestamp(metadata.started_at_unix, 0)
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| format!("Unix timestamp {}", metadata.started_at_unix));

        return LockError::Contention {
          scope: scope.to_path_buf(),
          command: metadata.command,
          pid: metadata.pid,
          started_at,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    LockError::ContentionUnknown {
      scope: scope.to_path_buf(),
      lock_path: lock_path.to_path_buf(),
    }
  }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result == 0 {
    let err = io::Error::last_os_error();
    // ERROR_LOCK_VIOLATION
    if err.raw_os_error() == Some(33) {
      return Err(io::Error::new(io::ErrorKind::WouldBlock, err));
    }
    Err(err)
  } else {
    Ok(())
  }
}
