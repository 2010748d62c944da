//! Drains the iostat queue for one gather cycle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use super::accumulator::{IostatWindow, NormalizedPoolStats};
use super::parser::{IostatLine, IostatParseError, parse_iostat_line};
use super::queue::{LineReceiver, Pop};
use crate::config::SufficiencyPolicy;

/// Shared handle to the receiving end of the current producer's queue.
///
/// The supervisor installs a fresh receiver for every producer attempt and
/// clears it on shutdown; gather cycles read through it. Holding the lock for
/// a whole cycle keeps cycles serialized.
#[derive(Clone, Default)]
pub struct IostatFeed {
    slot: Arc<Mutex<Option<LineReceiver>>>,
}

impl IostatFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<LineReceiver>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the current receiver, dropping the previous one.
    pub fn install(&self, receiver: LineReceiver) {
        *self.lock() = Some(receiver);
    }

    /// Drops the current receiver. A producer blocked on a full queue wakes
    /// with an error.
    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Lines waiting in the current queue.
    pub fn pending(&self) -> usize {
        self.lock().as_ref().map_or(0, LineReceiver::pending)
    }

    /// Full-queue stalls seen by the current producer.
    pub fn stalls(&self) -> u64 {
        self.lock().as_ref().map_or(0, LineReceiver::stalls)
    }

    /// Runs one sampling window over the current queue.
    ///
    /// Without an installed receiver there is nothing to sample and the
    /// result is empty.
    pub fn sample(
        &self,
        expected_pools: usize,
        policy: &SufficiencyPolicy,
    ) -> Result<BTreeMap<String, NormalizedPoolStats>, IostatParseError> {
        let guard = self.lock();
        match guard.as_ref() {
            Some(rx) => collect_window(rx, expected_pools, policy),
            None => Ok(BTreeMap::new()),
        }
    }
}

/// Drains `rx` until every one of `expected_pools` pools has an equal share
/// of samples, then normalizes.
///
/// The window closes once the record count is a non-zero multiple of
/// `expected_pools` and fewer than `expected_pools` lines are still queued.
/// Waiting for lines is bounded by `policy`; on timeout the window closes
/// with whatever was collected. A parse error aborts the window.
pub fn collect_window(
    rx: &LineReceiver,
    expected_pools: usize,
    policy: &SufficiencyPolicy,
) -> Result<BTreeMap<String, NormalizedPoolStats>, IostatParseError> {
    let mut window = IostatWindow::new();
    if expected_pools == 0 {
        return Ok(window.finish());
    }

    let mut empty_polls = 0u32;
    loop {
        let records = window.records();
        let balanced = records >= expected_pools && records % expected_pools == 0;
        if balanced && rx.pending() < expected_pools {
            break;
        }

        let next = if balanced {
            rx.try_pop()
        } else {
            rx.pop_timeout(policy.poll_interval)
        };

        match next {
            Pop::Line(line) => match parse_iostat_line(&line)? {
                IostatLine::Record(record) => window.fold(record),
                IostatLine::Skip => trace!("skipping separator line"),
            },
            Pop::Empty if balanced => break,
            Pop::Empty => {
                empty_polls += 1;
                if empty_polls >= policy.max_empty_polls {
                    warn!(
                        records,
                        expected_pools, "iostat window closed before every pool was sampled"
                    );
                    break;
                }
            }
            Pop::Closed => {
                debug!(records, "iostat producer gone, closing window");
                break;
            }
        }
    }

    debug!(
        records = window.records(),
        pending = rx.pending(),
        "iostat window drained"
    );
    Ok(window.finish())
}
