//! Moving files to and from the fleet host.
//!
//! Only two capabilities are needed: upload a file and download one. A
//! mounted copy of the host (`LocalTransport`) and `scp` (`ScpTransport`)
//! both provide them; `RetryingTransport` adds bounded retries on top.

mod retry;
mod scp;

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub use retry::{RetryPolicy, RetryingTransport};
pub use scp::ScpTransport;

use crate::error::ErrorClass;
use crate::manifest::{Manifest, ManifestError};
use crate::registry::RemoteSettings;
use crate::util::process::{ProcessError, run_blocking_with_timeout};

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("remote file not found: {path}")]
  NotFound { path: String },

  #[error("{op} {path}: {source}")]
  Io {
    op: &'static str,
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("{op} {path}: {source}")]
  Process {
    op: &'static str,
    path: String,
    #[source]
    source: ProcessError,
  },

  #[error("{op} {path} failed with code {code:?}: {stderr}")]
  Command {
    op: &'static str,
    path: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("remote path {path} leaves the mount")]
  OutsideMount { path: String },

  #[error("remote manifest {path} is invalid: {source}")]
  Parse {
    path: String,
    #[source]
    source: ManifestError,
  },
}

impl TransportError {
  /// Whether retrying the same call might succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      TransportError::Process { source, .. } => source.class().is_retriable(),
      // ssh reports connection failures as 255
      TransportError::Command { code, .. } => *code == Some(255),
      TransportError::Io { source, .. } => matches!(
        source.kind(),
        io::ErrorKind::TimedOut
          | io::ErrorKind::Interrupted
          | io::ErrorKind::WouldBlock
          | io::ErrorKind::ConnectionReset
          | io::ErrorKind::ConnectionAborted
      ),
      TransportError::NotFound { .. } | TransportError::OutsideMount { .. } | TransportError::Parse { .. } => false,
    }
  }

  pub fn class(&self) -> ErrorClass {
    match self {
      _ if self.is_transient() => ErrorClass::TransientIo,
      TransportError::Parse { source, .. } => source.class(),
      TransportError::OutsideMount { .. } => ErrorClass::Config,
      _ => ErrorClass::Io,
    }
  }
}

pub trait FileTransport {
  /// Short description for logs, e.g. `deploy@host`.
  fn describe(&self) -> String;

  fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

  fn download(&self, remote: &str) -> Result<Vec<u8>, TransportError>;
}

/// A host reachable through a local mount; remote paths resolve under `root`.
///
/// Each call runs on a worker thread bounded by `timeout`, so a hung mount
/// surfaces as a transient `TimedOut` error instead of blocking forever.
#[derive(Debug, Clone)]
pub struct LocalTransport {
  root: PathBuf,
  timeout: Duration,
}

impl LocalTransport {
  pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

  pub fn new(root: impl Into<PathBuf>) -> Self {
    LocalTransport {
      root: root.into(),
      timeout: Self::DEFAULT_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Map `remote` under the mount; `..` and prefixes are refused.
  fn resolve(&self, remote: &str) -> Result<PathBuf, TransportError> {
    let mut path = self.root.clone();
    for component in Path::new(remote).components() {
      match component {
        Component::Normal(part) => path.push(part),
        Component::RootDir | Component::CurDir => {}
        Component::ParentDir | Component::Prefix(_) => {
          return Err(TransportError::OutsideMount {
            path: remote.to_string(),
          });
        }
      }
    }
    Ok(path)
  }
}

impl FileTransport for LocalTransport {
  fn describe(&self) -> String {
    self.root.display().to_string()
  }

  fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
    let dest = self.resolve(remote)?;
    let local = local.to_path_buf();
    run_blocking_with_timeout(self.timeout, move || {
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(&local, &dest).map(drop)
    })
    .map_err(|source| TransportError::Io {
      op: "upload",
      path: remote.to_string(),
      source,
    })
  }

  fn download(&self, remote: &str) -> Result<Vec<u8>, TransportError> {
    let src = self.resolve(remote)?;
    run_blocking_with_timeout(self.timeout, move || fs::read(src)).map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        TransportError::NotFound {
          path: remote.to_string(),
        }
      } else {
        TransportError::Io {
          op: "download",
          path: remote.to_string(),
          source,
        }
      }
    })
  }
}

/// Build the transport described by `[remote]`, with retries.
pub fn from_settings(settings: &RemoteSettings) -> RetryingTransport {
  let inner: Box<dyn FileTransport> = match (&settings.mount, &settings.host) {
    (Some(mount), _) => Box::new(LocalTransport::new(mount).with_timeout(settings.timeout())),
    (None, host) => Box::new(ScpTransport::from_settings(host.as_deref().unwrap_or("localhost"), settings)),
  };
  RetryingTransport::new(inner, RetryPolicy::with_attempts(settings.attempts))
}

/// Download and parse a manifest written on the remote side.
pub fn fetch_manifest(transport: &dyn FileTransport, remote: &str) -> Result<Manifest, TransportError> {
  let bytes = transport.download(remote)?;
  Manifest::from_slice(&bytes, remote).map_err(|source| TransportError::Parse {
    path: remote.to_string(),
    source,
  })
}
