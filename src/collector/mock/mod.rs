//! Mock host implementations for testing.
//!
//! This module provides `MockFs`, `MockRunner` and pre-built scenarios for
//! testing collectors without a ZFS kernel module or the `zpool` binary.

mod filesystem;
mod runner;
mod scenarios;

pub use filesystem::MockFs;
pub use runner::MockRunner;
