//! Platform-specific directory lookups.

pub mod paths;
