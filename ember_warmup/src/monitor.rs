//! Deoptimization monitor.
//!
//! Warm compiles run on assumptions observed in a different process, so
//! real traffic can contradict them: the canonical case is a call site that
//! recorded as monomorphic and then receives a null or an unexpected
//! concrete type at replay time. The monitor's job is to discard such a
//! compile exactly once and keep the method on the standard tiered path for
//! the rest of the episode, never once per mismatching call.
//!
//! [`observe_call`](DeoptMonitor::observe_call) runs on the hot call path,
//! so the fast path is a map lookup plus one state load; the transition
//! itself is a single compare-and-set, which also resolves races between
//! two threads observing a mismatch at the same time (one wins, the other
//! sees an already-deoptimized method and does nothing).

use std::sync::Arc;

use ember_core::{CodeRef, MethodKey, ReceiverTypeHint};
use tracing::{debug, info};

use crate::state::{DeoptReason, StateTable, WarmState};
use crate::stats::WarmUpStats;

// =============================================================================
// Observation Outcome
// =============================================================================

/// What the runtime should do after reporting a call-site observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// Nothing to do; keep executing whatever is installed.
    Ignored,
    /// First observation matching the baked-in assumptions.
    Verified,
    /// The assumptions were violated. The runtime must discard the given
    /// warm compile and use the standard tiered path for this method for
    /// the rest of the episode.
    Deoptimized(CodeRef),
}

// =============================================================================
// Sweep Summary
// =============================================================================

/// Result of an end-of-warm-up sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Warm compiles the runtime must now discard.
    pub discarded: Vec<CodeRef>,
    /// Methods folded into `Retired` by this sweep.
    pub retired: usize,
}

// =============================================================================
// Monitor
// =============================================================================

/// Matching observations required before a warm compile counts as
/// verified and the monitor stops checking it.
pub const DEFAULT_VERIFY_THRESHOLD: u64 = 10_000;

/// Watches warm-compiled methods for assumption violations.
#[derive(Debug)]
pub struct DeoptMonitor {
    table: Arc<StateTable>,
    stats: Arc<WarmUpStats>,
    verify_threshold: u64,
}

impl DeoptMonitor {
    /// Create a monitor over the episode's state table.
    pub fn new(table: Arc<StateTable>, stats: Arc<WarmUpStats>) -> Self {
        Self::with_verify_threshold(table, stats, DEFAULT_VERIFY_THRESHOLD)
    }

    /// Create a monitor with a custom verification threshold.
    pub fn with_verify_threshold(
        table: Arc<StateTable>,
        stats: Arc<WarmUpStats>,
        verify_threshold: u64,
    ) -> Self {
        Self {
            table,
            stats,
            verify_threshold: verify_threshold.max(1),
        }
    }

    /// Report the receiver shape actually seen at one of the method's call
    /// sites. Invoked synchronously from the executing thread.
    ///
    /// A single mismatch deoptimizes the method; a long run of matching
    /// observations (the verification threshold) latches it as `Verified`
    /// and checking stops. Verification must stay lazy: an eager latch on
    /// the first matching call would shield the method from a mismatch
    /// arriving on the very next one.
    pub fn observe_call(&self, key: &MethodKey, observed: ReceiverTypeHint) -> ObserveOutcome {
        let Some(entry) = self.table.get(key) else {
            return ObserveOutcome::Ignored;
        };
        if entry.state() != WarmState::CompiledWarm {
            // Not running warm code, or a previous mismatch already handled
            // it. Later observations carry no new information.
            return ObserveOutcome::Ignored;
        }

        if entry.shapes().matches(observed) {
            if entry.note_match() >= self.verify_threshold
                && entry.try_transition(WarmState::CompiledWarm, WarmState::Verified)
            {
                self.stats.note_verified();
                return ObserveOutcome::Verified;
            }
            return ObserveOutcome::Ignored;
        }

        if entry.try_transition(WarmState::CompiledWarm, WarmState::Deoptimized) {
            entry.note_deopt(DeoptReason::ShapeMismatch);
            self.stats.note_mismatch_deopt();
            debug!(
                method = %entry.key(),
                observed = %observed,
                "warm compile deoptimized on assumption mismatch"
            );
            let code = entry.compiled().unwrap_or(entry.resolved());
            return ObserveOutcome::Deoptimized(code);
        }
        ObserveOutcome::Ignored
    }

    /// Discard and retire every warm compile still alive.
    ///
    /// Non-blocking: methods whose compile is still in flight are left to
    /// finish and can be picked up by a later sweep. Methods already
    /// deoptimized have no installed code left and only fold into
    /// `Retired`.
    pub fn sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        for entry in self.table.entries() {
            // CompiledWarm and Verified both still run warm code; discarding
            // it counts as one deoptimization event.
            for live in [WarmState::CompiledWarm, WarmState::Verified] {
                if entry.try_transition(live, WarmState::Retired) {
                    entry.note_deopt(DeoptReason::Sweep);
                    self.stats.note_swept();
                    let code = entry.compiled().unwrap_or(entry.resolved());
                    summary.discarded.push(code);
                    summary.retired += 1;
                }
            }
            if entry.try_transition(WarmState::Deoptimized, WarmState::Retired) {
                summary.retired += 1;
            }
        }
        info!(
            discarded = summary.discarded.len(),
            retired = summary.retired,
            "end-of-warm-up sweep"
        );
        summary
    }
}

// =============================================================================
// Tests
// =============================================================================
