//! CLI command implementations

pub mod watches;
