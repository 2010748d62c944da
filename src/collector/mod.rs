//! ZFS metrics collector for Linux.
//!
//! Pool and ARC statistics come from three places: the SPL kstat files under
//! `/proc/spl/kstat/zfs`, a one-shot `zpool list`, and a long-running
//! `zpool iostat` whose output is averaged over every gather interval.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ZfsCollector                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │    kstat     │   │  zpool_list  │   │      iostat      │  │
//! │  │  - <pool>/io │   │  - one-shot  │   │  - Supervisor    │  │
//! │  │  - arcstats  │   │              │   │  - Producer      │  │
//! │  └──────┬───────┘   └──────┬───────┘   │  - queue/sampler │  │
//! │         │                  │           └──────────────────┘  │
//! │  ┌──────▼──────┐   ┌───────▼───────┐                         │
//! │  │ FileSystem  │   │ CommandRunner │ (traits)                │
//! │  └──────┬──────┘   └───────┬───────┘                         │
//! └─────────┼──────────────────┼─────────────────────────────────┘
//!           │                  │
//!    ┌──────▼──────┐    ┌──────▼───────┐
//!    │ RealFs      │    │ SystemRunner │
//!    │ MockFs      │    │ MockRunner   │
//!    └─────────────┘    └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use zpoolmon::collector::{RealFs, SystemRunner, ZfsCollector};
//! use zpoolmon::config::ZfsConfig;
//!
//! let mut collector = ZfsCollector::new(RealFs::new(), SystemRunner, ZfsConfig::default());
//! collector.start()?;
//! let metrics = collector.gather()?;
//! collector.stop();
//! ```
//!
//! ## Testing (with mocks)
//!
//! ```
//! use zpoolmon::collector::{MockFs, MockRunner, ZfsCollector};
//! use zpoolmon::config::ZfsConfig;
//!
//! let mut collector = ZfsCollector::new(
//!     MockFs::two_pool_system(),
//!     MockRunner::new(),
//!     ZfsConfig::default(),
//! );
//! let metrics = collector.gather().unwrap();
//! assert_eq!(metrics[0].tags["pools"], "rpool::tank");
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod iostat;
pub mod kstat;
pub mod mock;
pub mod traits;
pub mod zpool_list;

pub use collector::{
    CollectError, GatherTiming, KstatSummary, PoolSnapshot, UNKNOWN_HEALTH, ZfsCollector,
};
pub use mock::{MockFs, MockRunner};
pub use traits::{CommandError, CommandRunner, FileSystem, RealFs, SystemRunner};
