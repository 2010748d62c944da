//! zpoolmon - ZFS pool and ARC metrics collector library.
//!
//! This library provides the core functionality used by:
//! - `zpoolmond` - background daemon printing metrics on an interval

pub mod collector;
pub mod config;
pub mod metrics;
pub mod util;
