//! Utility modules for zpoolmon.

mod backoff;

pub use backoff::RestartBackoff;
