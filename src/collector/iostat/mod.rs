//! Streaming `zpool iostat` pipeline.
//!
//! ```text
//!  zpool iostat -Hp -l -q -y 1
//!            │ stdout lines
//!   ┌────────▼────────┐   bounded    ┌──────────────┐  per-pool  ┌─────────────┐
//!   │ ProducerHandle  ├──── queue ──▶│ collect_window├──────────▶│ IostatWindow │
//!   └────────▲────────┘              └──────────────┘            └─────────────┘
//!            │ start / cancel / restart
//!   ┌────────┴────────┐
//!   │   Supervisor    │
//!   └─────────────────┘
//! ```
//!
//! The producer and supervisor run on background threads for the lifetime of
//! the collector. `collect_window` runs in the caller's thread once per gather
//! cycle and turns whatever the queue holds into per-pool averages.

pub mod accumulator;
pub mod parser;
pub mod producer;
pub mod queue;
pub mod sampler;
pub mod supervisor;

pub use accumulator::{IostatWindow, NormalizedPoolStats, PoolAccumulator};
pub use parser::{IostatCounters, IostatLine, IostatParseError, IostatRecord, parse_iostat_line};
pub use producer::{CancelHandle, ProducerError, ProducerHandle, ProducerOutcome};
pub use queue::{LineReceiver, LineSender, Pop, QueueClosed, line_queue};
pub use sampler::{IostatFeed, collect_window};
pub use supervisor::{Supervisor, SupervisorState};
