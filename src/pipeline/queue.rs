//! Bounded FIFO for inter-stage handoff.
//!
//! Beyond a plain channel, the queue supports explicit shutdown (producers
//! fail, consumers drain what is left), atomic flush, and observation of a
//! shared external-interrupt flag so every blocked consumer doubles as a
//! cancellation point. Waits re-check the interrupt flag on a short quantum,
//! which bounds how late a raised flag is noticed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// How often a blocked operation re-checks the interrupt flag.
const WAIT_QUANTUM: Duration = Duration::from_millis(100);

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Ok,
    /// The queue stayed full past the deadline; the item was dropped.
    Timeout,
    /// The queue is shut down; the item was dropped.
    Shutdown,
}

/// Outcome of a pop.
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    Item(T),
    Empty,
    Timeout,
    /// Shut down and fully drained.
    Shutdown,
    /// The external-interrupt flag was observed set; nothing was consumed.
    Interrupted,
}

struct Inner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Typed bounded queue with shutdown, flush, and interrupt observation.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// A queue whose blocking pops also observe `interrupt`.
    pub fn with_interrupt(capacity: usize, interrupt: Arc<AtomicBool>) -> Self {
        Self::build(capacity, Some(interrupt))
    }

    fn build(capacity: usize, interrupt: Option<Arc<AtomicBool>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            interrupt,
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Push with a deadline. Blocks while the queue is full.
    pub fn push(&self, item: T, timeout: Duration) -> PushResult {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();

        loop {
            if inner.shutdown {
                return PushResult::Shutdown;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return PushResult::Ok;
            }
            let now = Instant::now();
            if now >= deadline {
                return PushResult::Timeout;
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(inner, (deadline - now).min(WAIT_QUANTUM))
                .unwrap();
            inner = guard;
        }
    }

    /// Push that waits indefinitely for space or shutdown.
    pub fn push_blocking(&self, item: T) -> PushResult {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutdown {
                return PushResult::Shutdown;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return PushResult::Ok;
            }
            let (guard, _) = self.not_full.wait_timeout(inner, WAIT_QUANTUM).unwrap();
            inner = guard;
        }
    }

    /// Pop with a deadline.
    pub fn pop(&self, timeout: Duration) -> PopResult<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();

        loop {
            if self.interrupted() {
                return PopResult::Interrupted;
            }
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return PopResult::Item(item);
            }
            if inner.shutdown {
                return PopResult::Shutdown;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopResult::Timeout;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, (deadline - now).min(WAIT_QUANTUM))
                .unwrap();
            inner = guard;
        }
    }

    /// Pop that waits indefinitely for an item, shutdown, or interrupt.
    pub fn pop_blocking(&self) -> PopResult<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if self.interrupted() {
                return PopResult::Interrupted;
            }
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return PopResult::Item(item);
            }
            if inner.shutdown {
                return PopResult::Shutdown;
            }
            let (guard, _) = self.not_empty.wait_timeout(inner, WAIT_QUANTUM).unwrap();
            inner = guard;
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> PopResult<T> {
        let mut inner = self.inner.lock().unwrap();
        if self.interrupted() {
            return PopResult::Interrupted;
        }
        if let Some(item) = inner.items.pop_front() {
            self.not_full.notify_one();
            return PopResult::Item(item);
        }
        if inner.shutdown {
            return PopResult::Shutdown;
        }
        PopResult::Empty
    }

    /// Atomically discard all queued items, returning how many were dropped.
    pub fn flush(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.items.len();
        inner.items.clear();
        self.not_full.notify_all();
        count
    }

    /// Mark the queue shut down and wake every waiter. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.shutdown = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().unwrap().shutdown
    }

    /// Best-effort count of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
