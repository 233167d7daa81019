//! Warm-up episode counters.
//!
//! Everything here is diagnostic. Assumption violations in particular are
//! the expected steady-state signal the monitor exists to handle; they are
//! counted, never reported as failures.

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Counters
// =============================================================================

/// Thread-safe counters for one warm-up episode.
#[derive(Debug, Default)]
pub struct WarmUpStats {
    records_loaded: AtomicU64,
    unresolved_keys: AtomicU64,
    queued: AtomicU64,
    compiled: AtomicU64,
    compile_failures: AtomicU64,
    drained: AtomicU64,
    verified: AtomicU64,
    mismatch_deopts: AtomicU64,
    swept: AtomicU64,
}

impl WarmUpStats {
    /// Create a zeroed counter block.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn note_records_loaded(&self, count: u64) {
        self.records_loaded.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn note_unresolved(&self) {
        self.unresolved_keys.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_compiled(&self) {
        self.compiled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_compile_failure(&self) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_drained(&self) {
        self.drained.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_verified(&self) {
        self.verified.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_mismatch_deopt(&self) {
        self.mismatch_deopts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_swept(&self) {
        self.swept.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_loaded: self.records_loaded.load(Ordering::Relaxed),
            unresolved_keys: self.unresolved_keys.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            compiled: self.compiled.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            mismatch_deopts: self.mismatch_deopts.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of the episode counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records decoded from the log.
    pub records_loaded: u64,
    /// Recorded keys that no longer resolve against the loaded program.
    pub unresolved_keys: u64,
    /// Methods handed to the compile queue.
    pub queued: u64,
    /// Warm compiles installed.
    pub compiled: u64,
    /// Compiles that failed; isolated per method.
    pub compile_failures: u64,
    /// Queued entries retired without compiling when the queue closed.
    pub drained: u64,
    /// Warm compiles whose assumptions a live call confirmed.
    pub verified: u64,
    /// Deoptimizations triggered by assumption mismatches.
    pub mismatch_deopts: u64,
    /// Warm compiles discarded by the end-of-warm-up sweep.
    pub swept: u64,
}
