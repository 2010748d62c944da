//! Background reader for the long-running `zpool iostat` process.
//!
//! The producer runs on its own thread: it launches the command, pushes every
//! stdout line onto the bounded queue and forwards stderr to the log. It
//! reports exactly once, through the `on_exit` callback, how it ended.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::queue::LineSender;

/// How often the reaper checks whether the child has exited after EOF.
const REAP_POLL: Duration = Duration::from_millis(10);

/// Why a producer stopped without being cancelled.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("iostat command is empty")]
    EmptyCommand,
    #[error("{program} was not found or not executable: {source}")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} started without a stdout pipe")]
    MissingStdout { program: String },
    #[error("reading {program} output failed: {source}")]
    Read {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("waiting for {program} failed: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    Exited { program: String, status: ExitStatus },
    #[error("iostat queue was closed while {program} was running")]
    QueueClosed { program: String },
}

/// `Ok(())` when the producer was cancelled, otherwise the failure that
/// ended it.
pub type ProducerOutcome = Result<(), ProducerError>;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl CancelState {
    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Hands the spawned child over, killing it at once if a cancel already
    /// happened.
    fn adopt(&self, mut child: Child) {
        let mut slot = self.child();
        if self.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
        } else {
            *slot = Some(child);
        }
    }
}

/// Stops a running producer: kills its process, which ends the read loop.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.state.child().as_mut() {
            debug!(pid = child.id(), "killing iostat process");
            let _ = child.kill();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

/// Kills and reaps the child on every exit path of the producer thread.
struct Reaper(Arc<CancelState>);

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.child().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A running producer thread.
pub struct ProducerHandle {
    cancel: CancelHandle,
    thread: JoinHandle<()>,
}

impl ProducerHandle {
    /// Starts the producer thread for `command` (program followed by its
    /// arguments).
    ///
    /// Fails only if the thread itself cannot be created; command failures
    /// are reported through `on_exit`.
    pub fn spawn<F>(command: &[String], queue: LineSender, on_exit: F) -> io::Result<Self>
    where
        F: FnOnce(ProducerOutcome) + Send + 'static,
    {
        let cancel = CancelHandle::default();
        let state = cancel.state.clone();
        let command = command.to_vec();

        let thread = thread::Builder::new()
            .name("iostat-producer".into())
            .spawn(move || {
                let outcome = run(&command, &queue, &state);
                match &outcome {
                    Ok(()) => debug!("iostat producer cancelled"),
                    Err(e) => warn!(error = %e, "iostat producer stopped"),
                }
                on_exit(outcome);
            })?;

        Ok(Self { cancel, thread })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the producer thread to end.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("iostat producer thread panicked");
        }
    }
}

fn run(command: &[String], queue: &LineSender, state: &Arc<CancelState>) -> ProducerOutcome {
    let Some((program, args)) = command.split_first() else {
        return Err(ProducerError::EmptyCommand);
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| {
            error!(program = %program, error = %source, "failed to start iostat command");
            ProducerError::NotFound {
                program: program.clone(),
                source,
            }
        })?;

    info!(pid = child.id(), command = %command.join(" "), "iostat producer started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    state.adopt(child);
    let reaper = Reaper(state.clone());

    let stderr_proxy = stderr.and_then(proxy_stderr);

    let Some(stdout) = stdout else {
        return Err(ProducerError::MissingStdout {
            program: program.clone(),
        });
    };

    let streamed = stream_lines(stdout, queue, state);
    if streamed.is_err()
        && let Some(child) = state.child().as_mut()
    {
        let _ = child.kill();
    }
    let reaped = reap(state);
    drop(reaper);

    if let Some(handle) = stderr_proxy {
        let _ = handle.join();
    }

    if state.is_cancelled() {
        return Ok(());
    }

    match streamed {
        Err(StreamEnd::Read(source)) => Err(ProducerError::Read {
            program: program.clone(),
            source,
        }),
        Err(StreamEnd::QueueClosed) => Err(ProducerError::QueueClosed {
            program: program.clone(),
        }),
        Ok(lines) => match reaped {
            Ok(Some(status)) => {
                info!(%status, lines, "iostat command exited");
                Err(ProducerError::Exited {
                    program: program.clone(),
                    status,
                })
            }
            Ok(None) => Ok(()),
            Err(source) => Err(ProducerError::Wait {
                program: program.clone(),
                source,
            }),
        },
    }
}

enum StreamEnd {
    Read(io::Error),
    QueueClosed,
}

/// Copies lines from `stdout` to the queue until EOF or cancellation.
/// Returns the number of lines pushed.
fn stream_lines<R: Read>(
    stdout: R,
    queue: &LineSender,
    state: &CancelState,
) -> Result<u64, StreamEnd> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut lines = 0u64;

    loop {
        if state.is_cancelled() {
            return Ok(lines);
        }
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(lines),
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if queue.push(line).is_err() {
                    return Err(StreamEnd::QueueClosed);
                }
                lines += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamEnd::Read(e)),
        }
    }
}

/// Waits for the child to exit without holding its lock, so a concurrent
/// cancel can still kill it. `Ok(None)` means the child was already reaped.
fn reap(state: &CancelState) -> io::Result<Option<ExitStatus>> {
    loop {
        {
            let mut slot = state.child();
            let Some(child) = slot.as_mut() else {
                return Ok(None);
            };
            if let Some(status) = child.try_wait()? {
                slot.take();
                return Ok(Some(status));
            }
        }
        thread::sleep(REAP_POLL);
    }
}

/// Forwards the command's stderr to the log, one line at a time.
fn proxy_stderr(stderr: ChildStderr) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("iostat-stderr".into())
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) if !line.is_empty() => warn!(target: "zpool_iostat", "{}", line),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "copying iostat stderr failed");
                        break;
                    }
                }
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "could not start iostat stderr proxy");
            None
        }
    }
}
