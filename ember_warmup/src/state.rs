//! Per-method warm-up state machine.
//!
//! Every resolved method moves through a one-way state machine:
//!
//! ```text
//!                        ┌──────────▶ Retired ◀──────────┐
//!                        │ (drain / compile failure)     │ (sweep)
//!                        │                               │
//!  Pending ──▶ Queued ──▶ Compiling ──▶ CompiledWarm ──▶ Verified
//!                                            │
//!                                            └──▶ Deoptimized ──▶ Retired
//!                                                 (one per episode)  (sweep)
//! ```
//!
//! No transition is reversible and each one is claimed by a single atomic
//! compare-and-set, so two components racing on the same method cannot both
//! win. The scheduler writes `Pending`/`Queued`, compiler workers write
//! `Compiling`/`CompiledWarm`/`Retired`, and the deoptimization monitor
//! writes `Verified`/`Deoptimized`. The table additionally maintains a
//! pending counter (entries queued but not yet through compilation) that
//! backs the application's completion query without scanning tasks one by
//! one.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use ember_core::{CallSiteShapes, CodeRef, MethodKey};
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;

// =============================================================================
// Warm State
// =============================================================================

/// State of one method within the warm-up episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WarmState {
    /// Resolved from the log, not yet handed to the queue.
    Pending = 0,
    /// Sitting in the compile request queue.
    Queued = 1,
    /// Taken by a compiler worker; runs to completion or failure.
    Compiling = 2,
    /// Warm compile installed, assumptions unverified.
    CompiledWarm = 3,
    /// A live observation matched the baked-in assumptions.
    Verified = 4,
    /// A live observation violated the assumptions; the method fell back to
    /// the standard tiered path for the rest of the episode.
    Deoptimized = 5,
    /// Out of the episode entirely (compile failure, drain, or sweep).
    Retired = 6,
}

impl WarmState {
    /// Convert from the raw state word.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Queued),
            2 => Some(Self::Compiling),
            3 => Some(Self::CompiledWarm),
            4 => Some(Self::Verified),
            5 => Some(Self::Deoptimized),
            6 => Some(Self::Retired),
            _ => None,
        }
    }

    /// Whether this state ends the method's participation in the episode.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Deoptimized | Self::Retired)
    }
}

impl std::fmt::Display for WarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Compiling => "compiling",
            Self::CompiledWarm => "compiled-warm",
            Self::Verified => "verified",
            Self::Deoptimized => "deoptimized",
            Self::Retired => "retired",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Deopt Reason
// =============================================================================

/// Why a warm compile was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    /// A live call-site shape violated the baked-in assumption.
    ShapeMismatch = 1,
    /// The explicit end-of-warm-up sweep retired the method.
    Sweep = 2,
}

impl DeoptReason {
    #[inline]
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ShapeMismatch),
            2 => Some(Self::Sweep),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch => write!(f, "shape mismatch"),
            Self::Sweep => write!(f, "warm-up sweep"),
        }
    }
}

// =============================================================================
// Method Entry
// =============================================================================

/// Mutable per-method warm-up state.
///
/// The state word is the serialization point; all other fields are written
/// only by the component that owns the corresponding transition.
#[derive(Debug)]
pub struct MethodEntry {
    key: MethodKey,
    shapes: CallSiteShapes,
    weight: u64,
    resolved: CodeRef,
    state: AtomicU8,
    deopt_count: AtomicU32,
    last_deopt_reason: AtomicU8,
    match_count: AtomicU64,
    compiled: OnceLock<CodeRef>,
    failure: Mutex<Option<String>>,
}

impl MethodEntry {
    fn new(key: MethodKey, shapes: CallSiteShapes, weight: u64, resolved: CodeRef) -> Self {
        Self {
            key,
            shapes,
            weight,
            resolved,
            state: AtomicU8::new(WarmState::Pending as u8),
            deopt_count: AtomicU32::new(0),
            last_deopt_reason: AtomicU8::new(0),
            match_count: AtomicU64::new(0),
            compiled: OnceLock::new(),
            failure: Mutex::new(None),
        }
    }

    /// The method's reload-stable identity.
    #[inline]
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Assumptions baked into the warm compile.
    #[inline]
    pub fn shapes(&self) -> &CallSiteShapes {
        &self.shapes
    }

    /// Observed hotness from the recording run.
    #[inline]
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Handle the resolver produced for this method.
    #[inline]
    pub fn resolved(&self) -> CodeRef {
        self.resolved
    }

    /// Handle of the installed warm compile, if one was produced.
    #[inline]
    pub fn compiled(&self) -> Option<CodeRef> {
        self.compiled.get().copied()
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> WarmState {
        // The word only ever holds values written from WarmState.
        WarmState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(WarmState::Retired)
    }

    /// Number of deoptimization events for this method this episode.
    #[inline]
    pub fn deopt_count(&self) -> u32 {
        self.deopt_count.load(Ordering::Relaxed)
    }

    /// Reason for the most recent deoptimization event.
    pub fn last_deopt_reason(&self) -> Option<DeoptReason> {
        DeoptReason::from_u8(self.last_deopt_reason.load(Ordering::Relaxed))
    }

    /// Compile failure message, if the compile failed.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Attempt the `from -> to` transition. Exactly one caller can win any
    /// given transition.
    pub fn try_transition(&self, from: WarmState, to: WarmState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Matching observations seen so far.
    #[inline]
    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }

    /// Count a matching observation; returns the new total.
    pub(crate) fn note_match(&self) -> u64 {
        self.match_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a deoptimization event against this entry.
    pub(crate) fn note_deopt(&self, reason: DeoptReason) {
        self.deopt_count.fetch_add(1, Ordering::Relaxed);
        self.last_deopt_reason.store(reason as u8, Ordering::Relaxed);
    }

    pub(crate) fn install_compiled(&self, code: CodeRef) {
        // A second install attempt loses quietly; the state machine already
        // guarantees a single compiling worker per entry.
        let _ = self.compiled.set(code);
    }

    pub(crate) fn set_failure(&self, message: String) {
        *self.failure.lock() = Some(message);
    }
}

// =============================================================================
// State Table
// =============================================================================

/// The episode-wide table of method warm-up states.
///
/// Concurrently written by the scheduler, the compiler workers, and the
/// deoptimization monitor; sharded map access keeps the hot paths
/// lock-light. `pending` counts entries that reached `Queued` but have not
/// yet finished (or abandoned) compilation, so the completion query is a
/// single load rather than a scan.
#[derive(Debug, Default)]
pub struct StateTable {
    entries: DashMap<MethodKey, Arc<MethodEntry>, FxBuildHasher>,
    pending: AtomicUsize,
}

impl StateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly resolved method in `Pending` state.
    ///
    /// Re-inserting an already-tracked key is a no-op returning the existing
    /// entry, so a method can join an episode at most once.
    pub fn insert_resolved(
        &self,
        key: MethodKey,
        shapes: CallSiteShapes,
        weight: u64,
        resolved: CodeRef,
    ) -> Arc<MethodEntry> {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(MethodEntry::new(key, shapes, weight, resolved)))
            .clone()
    }

    /// Look up a method's entry.
    pub fn get(&self, key: &MethodKey) -> Option<Arc<MethodEntry>> {
        self.entries.get(key).map(|e| Arc::clone(&e))
    }

    /// Number of tracked methods.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table tracks no methods.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries still between `Queued` and the end of compilation.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Snapshot of all entries, in no particular order.
    pub fn entries(&self) -> Vec<Arc<MethodEntry>> {
        self.entries.iter().map(|e| Arc::clone(&e)).collect()
    }

    /// `Pending -> Queued`. Claims a slot in the pending counter.
    pub fn promote_to_queued(&self, entry: &MethodEntry) -> bool {
        if entry.try_transition(WarmState::Pending, WarmState::Queued) {
            self.pending.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        false
    }

    /// `Queued -> Compiling`. The pending slot stays claimed.
    pub fn begin_compile(&self, entry: &MethodEntry) -> bool {
        entry.try_transition(WarmState::Queued, WarmState::Compiling)
    }

    /// `Compiling -> CompiledWarm` with the produced code installed.
    pub fn complete_compile(&self, entry: &MethodEntry, code: CodeRef) -> bool {
        if entry.try_transition(WarmState::Compiling, WarmState::CompiledWarm) {
            entry.install_compiled(code);
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        false
    }

    /// `Compiling -> Retired` on compile failure, isolated to this method.
    pub fn fail_compile(&self, entry: &MethodEntry, message: String) -> bool {
        if entry.try_transition(WarmState::Compiling, WarmState::Retired) {
            entry.set_failure(message);
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        false
    }

    /// `Queued -> Retired` for entries drained from a closed queue without
    /// being compiled.
    pub fn retire_unqueued(&self, entry: &MethodEntry) -> bool {
        if entry.try_transition(WarmState::Queued, WarmState::Retired) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
