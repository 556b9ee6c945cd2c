//! fleetsync-lib: keep a fleet of long-running components in sync with a
//! source tree without destroying their runtime state.
//!
//! - `manifest`: content-hash snapshots of a directory tree
//! - `baseline`: recorded expected state and the drift gate
//! - `replace`: swap a code tree while keeping preserved runtime files
//! - `update`: staged self-update for the orchestrator, applied at its next start
//! - `deploy`: unpack a release archive and update, bootstrap and restart the fleet
//! - `registry`: the component registry every operation is driven by

pub mod archive;
pub mod baseline;
pub mod bootstrap;
pub mod consts;
pub mod deploy;
pub mod dir_lock;
pub mod error;
pub mod manifest;
pub mod platform;
pub mod preserve;
pub mod registry;
pub mod replace;
pub mod service;
pub mod transport;
pub mod update;
pub mod util;
