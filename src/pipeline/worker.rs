//! Stage lifecycle and control plumbing common to all pipeline workers.
//!
//! A stage implements `initialize → loop(process) → cleanup`; the runner
//! owns the thread and an in-band control inbox. Control messages are
//! dispatched between `process` calls, so `process` implementations must
//! use bounded waits to keep stop and interrupt observable.

use crate::defaults;
use crate::error::Result;
use crate::pipeline::message::ControlMessage;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a stage wants the loop to do after one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Continue,
    /// The stage observed a terminal condition (input queue shut down).
    Shutdown,
}

/// Errors surfaced by `process`.
///
/// Recoverable errors are logged and the stage keeps running after a short
/// back-off; fatal errors end the worker loop.
#[derive(Debug, Clone)]
pub enum StageError {
    Recoverable(String),
    Fatal(String),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StageError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

/// A long-lived pipeline worker.
pub trait Stage: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// One-time setup, run on the starting thread before the loop spawns.
    fn initialize(&mut self) -> Result<()>;

    /// One unit of work. May block on queues, bounded by the wait quantum.
    fn process(&mut self) -> std::result::Result<StageStatus, StageError>;

    /// First look at a control message. Return true when handled; default
    /// handling then applies to unhandled messages.
    fn handle_control(&mut self, _msg: &ControlMessage) -> bool {
        false
    }

    /// Release backend resources. Runs exactly once, also after a failed
    /// `initialize`.
    fn cleanup(&mut self) {}
}

/// Owns a stage's thread and control inbox.
pub struct StageRunner {
    name: &'static str,
    control_tx: Sender<ControlMessage>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StageRunner {
    /// Initializes the stage on the caller's thread, then spawns the worker
    /// loop. On initialization failure the stage's `cleanup` still runs.
    pub fn start<S: Stage>(mut stage: S) -> Result<Self> {
        let name = stage.name();

        if let Err(e) = stage.initialize() {
            stage.cleanup();
            return Err(e);
        }

        let (control_tx, control_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                run_loop(&mut stage, &control_rx, &thread_running);
                stage.cleanup();
                thread_running.store(false, Ordering::SeqCst);
                debug!(stage = name, "worker stopped");
            })
            .map_err(|e| crate::error::VoxdError::Pipeline {
                message: format!("Failed to spawn {} thread: {}", name, e),
            })?;

        info!(stage = name, "worker started");
        Ok(Self {
            name,
            control_tx,
            running,
            handle: Some(handle),
        })
    }

    /// Deposit a control message and wake the worker.
    pub fn signal(&self, msg: ControlMessage) {
        let _ = self.control_tx.send(msg);
    }

    /// Idempotent stop: request shutdown, join the thread.
    ///
    /// `cleanup` runs on the worker thread before it exits.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control_tx.send(ControlMessage::Shutdown);
            self.running.store(false, Ordering::SeqCst);
            if handle.join().is_err() {
                error!(stage = self.name, "worker thread panicked");
            }
        }
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for StageRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<S: Stage>(
    stage: &mut S,
    control_rx: &Receiver<ControlMessage>,
    running: &AtomicBool,
) {
    let name = stage.name();
    let mut paused = false;

    while running.load(Ordering::SeqCst) {
        if paused {
            // Only control traffic matters while paused.
            match control_rx.recv_timeout(Duration::from_millis(defaults::STAGE_WAIT_MS)) {
                Ok(msg) => {
                    if dispatch(stage, &msg, &mut paused) {
                        return;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            }
            continue;
        }

        match stage.process() {
            Ok(StageStatus::Continue) => {}
            Ok(StageStatus::Shutdown) => {
                debug!(stage = name, "input shut down, exiting");
                return;
            }
            Err(StageError::Recoverable(msg)) => {
                warn!(stage = name, "{}", msg);
                thread::sleep(Duration::from_millis(defaults::ERROR_BACKOFF_MS));
            }
            Err(StageError::Fatal(msg)) => {
                error!(stage = name, "{}", msg);
                return;
            }
        }

        // Dispatch everything that arrived while processing.
        while let Ok(msg) = control_rx.try_recv() {
            if dispatch(stage, &msg, &mut paused) {
                return;
            }
        }
    }
}

/// Returns true when the loop should exit.
fn dispatch<S: Stage>(stage: &mut S, msg: &ControlMessage, paused: &mut bool) -> bool {
    if stage.handle_control(msg) {
        return false;
    }
    match msg {
        ControlMessage::Shutdown => true,
        ControlMessage::Pause => {
            *paused = true;
            false
        }
        ControlMessage::Resume => {
            *paused = false;
            false
        }
        // Interrupt and Flush are stage-specific; unhandled ones are no-ops.
        ControlMessage::Interrupt | ControlMessage::Flush => false,
    }
}
