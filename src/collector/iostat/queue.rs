//! Bounded line queue between the iostat producer and the sampler.
//!
//! Built on `std::sync::mpsc::sync_channel`: a full queue blocks the producer
//! (backpressure), and the consumer can either poll or wait with a deadline.
//! Occupancy and stall counts are tracked alongside so slow consumers show up
//! in the logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use tracing::warn;

/// Counters shared by both ends of a queue.
#[derive(Debug, Default)]
struct QueueStats {
    pending: AtomicUsize,
    stalls: AtomicU64,
}

/// Creates a queue holding at most `capacity` lines.
pub fn line_queue(capacity: usize) -> (LineSender, LineReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        LineSender {
            tx,
            stats: stats.clone(),
        },
        LineReceiver {
            rx,
            stats,
            capacity,
        },
    )
}

/// The receiving end was dropped; no more lines will be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Producer end of the queue.
pub struct LineSender {
    tx: SyncSender<String>,
    stats: Arc<QueueStats>,
}

impl LineSender {
    /// Pushes a line, blocking while the queue is full.
    pub fn push(&self, line: String) -> Result<(), QueueClosed> {
        self.stats.pending.fetch_add(1, Ordering::SeqCst);
        let result = match self.tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(line)) => {
                let stalls = self.stats.stalls.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(stalls, "iostat queue full, producer blocked until the next gather");
                self.tx.send(line).map_err(|_| QueueClosed)
            }
            Err(TrySendError::Disconnected(_)) => Err(QueueClosed),
        };
        if result.is_err() {
            self.stats.pending.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }
}

/// Outcome of a single receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    Line(String),
    /// Nothing arrived (immediately, or before the deadline).
    Empty,
    /// The producer is gone and the queue is drained.
    Closed,
}

/// Consumer end of the queue.
pub struct LineReceiver {
    rx: Receiver<String>,
    stats: Arc<QueueStats>,
    capacity: usize,
}

impl LineReceiver {
    /// Takes the next line without waiting.
    pub fn try_pop(&self) -> Pop {
        match self.rx.try_recv() {
            Ok(line) => self.taken(line),
            Err(TryRecvError::Empty) => Pop::Empty,
            Err(TryRecvError::Disconnected) => Pop::Closed,
        }
    }

    /// Waits up to `timeout` for the next line.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => self.taken(line),
            Err(RecvTimeoutError::Timeout) => Pop::Empty,
            Err(RecvTimeoutError::Disconnected) => Pop::Closed,
        }
    }

    fn taken(&self, line: String) -> Pop {
        // saturating: a push may still be between its increment and the send
        let _ = self
            .stats
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        Pop::Line(line)
    }

    /// Lines pushed but not yet consumed.
    pub fn pending(&self) -> usize {
        self.stats.pending.load(Ordering::SeqCst).min(self.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of times a push found the queue full.
    pub fn stalls(&self) -> u64 {
        self.stats.stalls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order_and_pending() {
        let (tx, rx) = line_queue(4);
        tx.push("a".into()).unwrap();
        tx.push("b".into()).unwrap();
        assert_eq!(rx.pending(), 2);

        assert_eq!(rx.try_pop(), Pop::Line("a".into()));
        assert_eq!(rx.try_pop(), Pop::Line("b".into()));
        assert_eq!(rx.try_pop(), Pop::Empty);
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_closed_after_sender_dropped_and_drained() {
        let (tx, rx) = line_queue(4);
        tx.push("last".into()).unwrap();
        drop(tx);

        assert_eq!(rx.try_pop(), Pop::Line("last".into()));
        assert_eq!(rx.try_pop(), Pop::Closed);
        assert_eq!(rx.pop_timeout(Duration::from_millis(10)), Pop::Closed);
    }

    #[test]
    fn test_push_fails_when_receiver_dropped() {
        let (tx, rx) = line_queue(1);
        drop(rx);
        assert_eq!(tx.push("x".into()), Err(QueueClosed));
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let (tx, rx) = line_queue(4);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.push("late".into()).unwrap();
        });

        let start = Instant::now();
        assert_eq!(
            rx.pop_timeout(Duration::from_secs(5)),
            Pop::Line("late".into())
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_full_queue_blocks_producer_until_drained() {
        let (tx, rx) = line_queue(1);
        tx.push("first".into()).unwrap();

        let handle = thread::spawn(move || tx.push("second".into()));

        // Give the producer time to hit the full queue.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rx.stalls(), 1);
        assert_eq!(rx.try_pop(), Pop::Line("first".into()));

        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(rx.pop_timeout(Duration::from_secs(1)), Pop::Line("second".into()));
    }

    #[test]
    fn test_blocked_producer_released_when_receiver_dropped() {
        let (tx, rx) = line_queue(1);
        tx.push("first".into()).unwrap();

        let handle = thread::spawn(move || tx.push("second".into()));
        thread::sleep(Duration::from_millis(50));
        drop(rx);

        assert_eq!(handle.join().unwrap(), Err(QueueClosed));
    }
}
