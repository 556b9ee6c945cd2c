//! Content-addressed manifests of a directory tree.
//!
//! A manifest maps every included regular file under a root to its size and
//! SHA-256 digest. Two manifests built with the same [`IncludeRule`] and
//! normalization flag are directly comparable, which is what the baseline
//! gate relies on.

mod build;
mod rule;
mod types;

pub use build::build;
pub use rule::{IncludeRule, RuleMatcher};
pub use types::*;
