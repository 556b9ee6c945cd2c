use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::{FileTransport, TransportError};

/// Bounded attempts with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      max_attempts: 3,
      initial_backoff: Duration::from_millis(500),
      max_backoff: Duration::from_secs(8),
    }
  }
}

impl RetryPolicy {
  pub fn with_attempts(max_attempts: u32) -> Self {
    RetryPolicy {
      max_attempts: max_attempts.max(1),
      ..RetryPolicy::default()
    }
  }

  /// Delay before retry number `retry` (1-based).
  pub fn backoff(&self, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
  }

  /// Run `op`, retrying transient failures until attempts run out.
  pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T, TransportError>) -> Result<T, TransportError> {
    let mut attempt = 1;
    loop {
      match op() {
        Err(e) if e.is_transient() && attempt < self.max_attempts => {
          let delay = self.backoff(attempt);
          warn!(what, attempt, max_attempts = self.max_attempts, delay = ?delay, error = %e, "transient transport error, retrying");
          thread::sleep(delay);
          attempt += 1;
        }
        result => return result,
      }
    }
  }
}

/// Wraps a transport so transient failures are retried per `RetryPolicy`.
pub struct RetryingTransport {
  inner: Box<dyn FileTransport>,
  policy: RetryPolicy,
}

impl RetryingTransport {
  pub fn new(inner: Box<dyn FileTransport>, policy: RetryPolicy) -> Self {
    RetryingTransport { inner, policy }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }
}

impl FileTransport for RetryingTransport {
  fn describe(&self) -> String {
    self.inner.describe()
  }

  fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
    self.policy.run(remote, || self.inner.upload(local, remote))
  }

  fn download(&self, remote: &str) -> Result<Vec<u8>, TransportError> {
    self.policy.run(remote, || self.inner.download(remote))
  }
}
