//! Baseline comparison and the drift gate.
//!
//! A baseline is the last manifest this tool recorded for a live root, in
//! other words the expected remote state. Before any mutating operation the
//! caller captures a fresh manifest and runs [`ensure_no_drift`]; anything
//! changed, missing or unexpected aborts the operation before it starts.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/baselines/
//! ├── index.json          # BaselineIndex: list + current pointer
//! └── <id>.json           # Individual Baseline files
//! ```

mod diff;
mod storage;
mod types;

pub use diff::{DiffResult, compare, ensure_no_drift};
pub use storage::{BaselineStore, RetentionPolicy};
pub use types::*;
