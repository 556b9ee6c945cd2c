//! Shared utilities.
//!
//! Hashing, pattern matching, filesystem helpers and child process execution.

pub mod fs;
pub mod hash;
pub mod pattern;
pub mod process;

#[cfg(test)]
pub mod testutil;
