//! Compile request queue.
//!
//! An ordered, deduplicated work queue consumed by the background compiler
//! workers. Requests are kept in priority order (higher observed hotness
//! first) with insertion order breaking ties, so the hottest recorded
//! methods compile first and equal-weight methods keep their original log
//! order.
//!
//! `enqueue` is idempotent per method key: while a key has a live entry in
//! the queue, re-enqueueing it is a no-op. Closing the queue is idempotent,
//! wakes every blocked worker, and hands the undrained entries back to the
//! caller so they can be retired without being compiled.

use std::collections::VecDeque;

use ember_core::MethodKey;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

// =============================================================================
// Compile Request
// =============================================================================

/// One queued warm-up compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Method to compile.
    pub key: MethodKey,
    /// Priority, the record's invocation weight. Higher compiles first.
    pub priority: u64,
    /// Enqueue sequence number; earlier wins among equal priorities.
    pub seq: u64,
}

// =============================================================================
// Compile Queue
// =============================================================================

/// Thread-safe producer/consumer queue for warm-up compile requests.
#[derive(Debug, Default)]
pub struct CompileQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

#[derive(Debug, Default)]
struct QueueInner {
    entries: VecDeque<CompileRequest>,
    live: FxHashSet<MethodKey>,
    next_seq: u64,
    closed: bool,
}

impl CompileQueue {
    /// Create an open, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a request. Returns `false` without queuing if the key already
    /// has a live entry or the queue is closed.
    pub fn enqueue(&self, key: MethodKey, priority: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed || inner.live.contains(&key) {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.live.insert(key.clone());

        let request = CompileRequest { key, priority, seq };
        // Insert before the first strictly lower priority entry; equal
        // priorities stay in submission order.
        let at = inner
            .entries
            .iter()
            .position(|r| r.priority < request.priority)
            .unwrap_or(inner.entries.len());
        inner.entries.insert(at, request);

        self.available.notify_one();
        true
    }

    /// Block until a request is available or the queue closes. Returns
    /// `None` once the queue is closed, at which point the worker exits.
    pub fn dequeue(&self) -> Option<CompileRequest> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(request) = inner.entries.pop_front() {
                inner.live.remove(&request.key);
                return Some(request);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Take a request without blocking.
    pub fn try_dequeue(&self) -> Option<CompileRequest> {
        let mut inner = self.inner.lock();
        let request = inner.entries.pop_front()?;
        inner.live.remove(&request.key);
        Some(request)
    }

    /// Close the queue, waking all blocked workers, and drain whatever was
    /// still queued. Idempotent; later calls return nothing.
    pub fn close(&self) -> Vec<CompileRequest> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let drained: Vec<_> = inner.entries.drain(..).collect();
        inner.live.clear();
        self.available.notify_all();
        drained
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no requests are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
