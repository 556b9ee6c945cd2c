//! Runtime-owned paths that must survive a code swap.
//!
//! [`PreserveSpec`] decides which paths under a component directory belong
//! to the server (secrets, JSON data stores, logs, lock files).
//! [`PreserveArchive`] captures those files and symlinks into a tar archive
//! stored outside the component directory, restores them over a fresh tree,
//! and verifies them afterwards.

mod archive;
mod spec;

pub use archive::{PreserveArchive, PreserveError, PreservedEntry};
pub use spec::{PreserveSpec, PreserveSpecError};
