//! Replay scheduler.
//!
//! At replay start the scheduler decodes the warm-up log, resolves each
//! recorded identity against the currently loaded program, and feeds the
//! resolved methods to the compile request queue, hottest first. Every
//! failure on this path degrades: a missing or undecodable log disables the
//! episode, an unresolvable key drops that one method. Ordinary tiered
//! compilation is never affected.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ember_core::{CodeRef, MethodKey, WarmUpRecord};
use tracing::{debug, info, warn};

use crate::codec::{self, DecodedLog};
use crate::queue::CompileQueue;
use crate::state::StateTable;
use crate::stats::WarmUpStats;

// =============================================================================
// Resolver Boundary
// =============================================================================

/// The loaded program, at its interface boundary.
///
/// Resolution maps a reload-stable key back to a live method. Keys that no
/// longer match anything (class renamed or removed, signature changed) must
/// resolve to `None`; that is an ordinary outcome, not an error.
pub trait ProgramResolver {
    /// Resolve a recorded key against the loaded program.
    fn resolve(&self, key: &MethodKey) -> Option<CodeRef>;

    /// Hint that the given keys are about to be resolved, letting the host
    /// load their defining units up front. Called only when eager
    /// resolution is configured. The default does nothing.
    fn preload(&self, _keys: &[MethodKey]) {}
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a replay scheduling attempt.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// Warm-up is off for this episode; the run degrades to ordinary tiered
    /// compilation.
    Disabled {
        /// Why the episode could not start.
        reason: String,
    },
    /// The log was consumed and requests are queued.
    Scheduled {
        /// Methods handed to the compile queue.
        queued: usize,
        /// Recorded keys that no longer resolve.
        unresolved: usize,
        /// Whether the log was truncated mid-write; the decoded prefix was
        /// still replayed.
        truncated: bool,
    },
}

/// Usage error for the completion query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStateError {
    /// `is_replay_complete` was called before any replay was requested.
    NotRequested,
}

impl std::fmt::Display for ReplayStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayStateError::NotRequested => {
                write!(f, "replay completion queried before a replay was requested")
            }
        }
    }
}

impl std::error::Error for ReplayStateError {}

// =============================================================================
// Scheduler
// =============================================================================

/// Loads the log and drives methods into the compile queue.
#[derive(Debug)]
pub struct ReplayScheduler {
    table: Arc<StateTable>,
    queue: Arc<CompileQueue>,
    stats: Arc<WarmUpStats>,
    requested: AtomicBool,
}

impl ReplayScheduler {
    /// Create a scheduler over the episode's table and queue.
    pub fn new(
        table: Arc<StateTable>,
        queue: Arc<CompileQueue>,
        stats: Arc<WarmUpStats>,
    ) -> Self {
        Self {
            table,
            queue,
            stats,
            requested: AtomicBool::new(false),
        }
    }

    /// Read, decode and schedule the log at `path`.
    pub fn schedule_from_path(
        &self,
        path: &Path,
        resolver: &dyn ProgramResolver,
        eager: bool,
    ) -> ReplayOutcome {
        self.requested.store(true, Ordering::Release);

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "warm-up log unreadable, episode disabled");
                return ReplayOutcome::Disabled {
                    reason: format!("log unreadable: {e}"),
                };
            }
        };
        let log = match codec::decode(&bytes) {
            Ok(log) => log,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "warm-up log undecodable, episode disabled");
                return ReplayOutcome::Disabled {
                    reason: format!("log undecodable: {e}"),
                };
            }
        };
        self.schedule(log, resolver, eager)
    }

    /// Schedule an already decoded log.
    pub fn schedule(
        &self,
        log: DecodedLog,
        resolver: &dyn ProgramResolver,
        eager: bool,
    ) -> ReplayOutcome {
        self.requested.store(true, Ordering::Release);
        if log.truncated {
            warn!(
                decoded = log.records.len(),
                expected = log.header.record_count,
                "warm-up log truncated, replaying the decoded prefix"
            );
        }
        self.stats.note_records_loaded(log.records.len() as u64);

        let mut records = log.records;
        // Hotter methods compile first. The sort is stable, so equal weights
        // keep their original log order.
        records.sort_by(|a, b| b.invocation_weight.cmp(&a.invocation_weight));

        if eager {
            let keys: Vec<MethodKey> = records.iter().map(|r| r.key.clone()).collect();
            resolver.preload(&keys);
        }

        let mut queued = 0usize;
        let mut unresolved = 0usize;
        for record in records {
            match resolver.resolve(&record.key) {
                Some(code) => {
                    if self.schedule_record(record, code) {
                        queued += 1;
                    }
                }
                None => {
                    debug!(method = %record.key, "recorded method no longer resolves, dropped");
                    self.stats.note_unresolved();
                    unresolved += 1;
                }
            }
        }

        info!(queued, unresolved, truncated = log.truncated, "warm-up replay scheduled");
        ReplayOutcome::Scheduled {
            queued,
            unresolved,
            truncated: log.truncated,
        }
    }

    /// Track one resolved record and push it onto the queue.
    fn schedule_record(&self, record: WarmUpRecord, code: CodeRef) -> bool {
        let WarmUpRecord {
            key,
            shapes,
            invocation_weight,
        } = record;
        let entry =
            self.table
                .insert_resolved(key.clone(), shapes, invocation_weight, code);
        if !self.table.promote_to_queued(&entry) {
            // Already queued or further along; a duplicate log entry is a
            // no-op.
            return false;
        }
        if !self.queue.enqueue(key, invocation_weight) {
            // The queue closed under us; give the pending slot back.
            self.table.retire_unqueued(&entry);
            return false;
        }
        self.stats.note_queued();
        true
    }

    /// Whether every method that reached the queue has finished or left
    /// compilation.
    ///
    /// Calling this before any replay was requested is a usage error, not a
    /// `false`.
    pub fn is_replay_complete(&self) -> Result<bool, ReplayStateError> {
        if !self.requested.load(Ordering::Acquire) {
            return Err(ReplayStateError::NotRequested);
        }
        Ok(self.table.pending_count() == 0)
    }

    /// Whether a replay has been requested for this episode.
    pub fn replay_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Abort the episode: close the queue and retire everything still
    /// queued without compiling it.
    pub fn abort(&self) -> usize {
        let drained = self.queue.close();
        let mut retired = 0usize;
        for request in drained {
            if let Some(entry) = self.table.get(&request.key) {
                if self.table.retire_unqueued(&entry) {
                    self.stats.note_drained();
                    retired += 1;
                }
            }
        }
        if retired > 0 {
            info!(retired, "warm-up aborted, queued compiles retired");
        }
        retired
    }
}

// =============================================================================
// Tests
// =============================================================================
