//! Lifecycle management for the `zpool iostat` producer.
//!
//! `start()` spawns a supervisor thread that runs the producer and restarts
//! it with exponential backoff whenever it stops on its own:
//!
//! ```text
//!   Idle ──start──▶ Running ──producer exit──▶ Failed ──▶ Restarting ─┐
//!    ▲                 ▲                          │                    │
//!    │                 └──────── delay elapsed ───┼────────────────────┘
//!    └──────── stop() / restart limit reached ────┘
//! ```
//!
//! `stop()` kills the process, drops the queue receiver so a producer blocked
//! on a full queue wakes up, and joins both threads.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::producer::{ProducerHandle, ProducerOutcome};
use super::queue::line_queue;
use super::sampler::IostatFeed;
use crate::config::IostatConfig;
use crate::util::RestartBackoff;

/// Where the supervisor currently is in its restart cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
    #[default]
    Idle,
    Running,
    Failed,
    Restarting,
}

enum Event {
    Stop,
    ProducerExited {
        generation: u64,
        outcome: ProducerOutcome,
    },
}

#[derive(Debug, Default)]
struct Status {
    state: Mutex<SupervisorState>,
    restarts: AtomicU32,
}

impl Status {
    fn set(&self, state: SupervisorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn get(&self) -> SupervisorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An active supervisor thread and the channel used to stop it.
struct Session {
    events: Sender<Event>,
    thread: JoinHandle<()>,
}

/// Owns the iostat producer and keeps it running.
pub struct Supervisor {
    config: IostatConfig,
    feed: IostatFeed,
    status: Arc<Status>,
    session: Option<Session>,
}

impl Supervisor {
    pub fn new(config: IostatConfig) -> Self {
        Self {
            config,
            feed: IostatFeed::new(),
            status: Arc::new(Status::default()),
            session: None,
        }
    }

    /// Handle the sampler reads lines through.
    pub fn feed(&self) -> IostatFeed {
        self.feed.clone()
    }

    /// Starts the producer under supervision. Does nothing if already started.
    pub fn start(&mut self) -> io::Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            config: self.config.clone(),
            feed: self.feed.clone(),
            status: self.status.clone(),
            events_tx: tx.clone(),
            events: rx,
        };
        self.status.restarts.store(0, Ordering::SeqCst);
        let thread = thread::Builder::new()
            .name("iostat-supervisor".into())
            .spawn(move || worker.run())?;

        self.session = Some(Session { events: tx, thread });
        Ok(())
    }

    /// Stops the producer and waits for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let _ = session.events.send(Event::Stop);
        if session.thread.join().is_err() {
            error!("iostat supervisor thread panicked");
        }
        self.feed.clear();
        self.status.set(SupervisorState::Idle);
    }

    pub fn state(&self) -> SupervisorState {
        self.status.get()
    }

    /// Restarts performed since the last `start()`.
    pub fn restarts(&self) -> u32 {
        self.status.restarts.load(Ordering::SeqCst)
    }

    /// Whether a supervisor thread is alive (it exits on its own only after
    /// hitting the restart limit).
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.thread.is_finished())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    config: IostatConfig,
    feed: IostatFeed,
    status: Arc<Status>,
    events_tx: Sender<Event>,
    events: Receiver<Event>,
}

impl Worker {
    fn run(self) {
        let policy = &self.config.restart;
        let mut backoff = RestartBackoff::new(policy.initial_delay, policy.max_delay);
        let mut generation = 0u64;

        loop {
            generation += 1;
            let started = Instant::now();

            let outcome = match self.spawn_producer(generation) {
                Ok(producer) => {
                    match self.wait_for_exit(generation) {
                        Some(outcome) => {
                            producer.cancel();
                            producer.join();
                            outcome
                        }
                        None => {
                            producer.cancel();
                            self.feed.clear();
                            producer.join();
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "could not start iostat producer thread");
                    Ok(())
                }
            };

            self.status.set(SupervisorState::Failed);
            let reason = match &outcome {
                Ok(()) => "producer stopped".to_string(),
                Err(e) => e.to_string(),
            };

            if started.elapsed() >= policy.stable_after {
                backoff.reset();
            }
            if let Some(max) = policy.max_restarts
                && backoff.attempts() >= max
            {
                error!(
                    error = %reason,
                    max_restarts = max,
                    "zpool iostat keeps failing, giving up"
                );
                break;
            }

            let delay = backoff.next_delay();
            let restarts = self.status.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            self.status.set(SupervisorState::Restarting);
            warn!(
                error = %reason,
                restarts,
                delay_ms = delay.as_millis() as u64,
                "zpool iostat stopped, restarting"
            );

            if !self.sleep_unless_stopped(delay) {
                break;
            }
        }

        self.feed.clear();
        self.status.set(SupervisorState::Idle);
        info!("iostat supervisor stopped");
    }

    fn spawn_producer(&self, generation: u64) -> io::Result<ProducerHandle> {
        let (sender, receiver) = line_queue(self.config.buffer_size);
        self.feed.install(receiver);

        let events = self.events_tx.clone();
        debug!(generation, "starting iostat producer");
        self.status.set(SupervisorState::Running);
        ProducerHandle::spawn(&self.config.command, sender, move |outcome| {
            let _ = events.send(Event::ProducerExited {
                generation,
                outcome,
            });
        })
    }

    /// Blocks until the producer of `generation` exits (`Some`) or a stop
    /// is requested (`None`).
    fn wait_for_exit(&self, generation: u64) -> Option<ProducerOutcome> {
        loop {
            match self.events.recv() {
                Ok(Event::ProducerExited {
                    generation: g,
                    outcome,
                }) if g == generation => return Some(outcome),
                Ok(Event::ProducerExited { generation: g, .. }) => {
                    debug!(generation = g, "ignoring exit of a previous producer");
                }
                Ok(Event::Stop) | Err(_) => return None,
            }
        }
    }

    /// Sleeps for `delay`; returns `false` if a stop arrived meanwhile.
    fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.events.recv_timeout(remaining) {
                Ok(Event::Stop) | Err(RecvTimeoutError::Disconnected) => return false,
                Ok(Event::ProducerExited { .. }) => {}
                Err(RecvTimeoutError::Timeout) => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestartPolicy;

    fn config(script: &str, restart: RestartPolicy) -> IostatConfig {
        IostatConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            buffer_size: 64,
            restart,
            ..IostatConfig::default()
        }
    }

    fn fast_restart() -> RestartPolicy {
        RestartPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            max_restarts: None,
            stable_after: Duration::from_secs(60),
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    const STREAM: &str = "while :; do printf 'tank\\t1\\n'; sleep 0.02; done";

    #[test]
    fn test_start_streams_lines_and_stop_cleans_up() {
        let mut sup = Supervisor::new(config(STREAM, fast_restart()));
        let feed = sup.feed();
        assert_eq!(sup.state(), SupervisorState::Idle);

        sup.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || feed.pending() > 0));
        assert_eq!(sup.state(), SupervisorState::Running);
        assert!(sup.is_running());

        let start = Instant::now();
        sup.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert!(!feed.is_connected());
        assert!(!sup.is_running());
        assert_eq!(sup.restarts(), 0);
    }

    #[test]
    fn test_restart_after_stop_succeeds() {
        let mut sup = Supervisor::new(config(STREAM, fast_restart()));
        let feed = sup.feed();

        sup.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || feed.pending() > 0));
        sup.stop();

        sup.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || feed.pending() > 0));
        assert_eq!(sup.state(), SupervisorState::Running);
        sup.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut sup = Supervisor::new(config(STREAM, fast_restart()));
        sup.stop();
        sup.start().unwrap();
        sup.start().unwrap();
        sup.stop();
        sup.stop();
        assert_eq!(sup.state(), SupervisorState::Idle);
    }

    #[test]
    fn test_exiting_command_is_restarted() {
        let mut sup = Supervisor::new(config("printf 'tank\\t1\\n'; exit 1", fast_restart()));
        sup.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || sup.restarts() >= 2));
        assert!(sup.is_running());
        sup.stop();
        assert_eq!(sup.state(), SupervisorState::Idle);
    }

    #[test]
    fn test_missing_command_is_restarted() {
        let mut cfg = config("", fast_restart());
        cfg.command = vec!["/nonexistent/zpool-12345".into()];
        let mut sup = Supervisor::new(cfg);
        sup.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || sup.restarts() >= 1));
        sup.stop();
    }

    #[test]
    fn test_gives_up_after_max_restarts() {
        let restart = RestartPolicy {
            max_restarts: Some(2),
            ..fast_restart()
        };
        let mut sup = Supervisor::new(config("exit 1", restart));
        let feed = sup.feed();
        sup.start().unwrap();

        assert!(wait_until(Duration::from_secs(5), || !sup.is_running()));
        assert_eq!(sup.restarts(), 2);
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert!(!feed.is_connected());
        sup.stop();
    }
}
