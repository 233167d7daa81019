//! Per-episode engine context.
//!
//! One [`WarmUpEngine`] is one warm-up episode: either the recording half
//! (observe and flush the log) or the replay half (consume the log, compile
//! ahead of schedule, watch for assumption violations). All episode state
//! lives in the context object rather than process-wide globals, so several
//! engines can coexist in one process.
//!
//! Construction validates the configuration preconditions before anything
//! else happens; a violation is returned to the embedder and no recording
//! or replay work starts. After that, nothing in the engine can terminate
//! the hosting process. Failures degrade to "behave as if warm-up were
//! absent".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ember_core::{MethodKey, ReceiverTypeHint};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::codec;
use crate::config::{ConfigError, HostFlags, WarmUpConfig, WarmUpMode};
use crate::lifecycle::LifecycleError;
use crate::monitor::{DeoptMonitor, ObserveOutcome, SweepSummary};
use crate::queue::CompileQueue;
use crate::recorder::Recorder;
use crate::scheduler::{ProgramResolver, ReplayOutcome, ReplayScheduler};
use crate::state::{StateTable, WarmState};
use crate::stats::{StatsSnapshot, WarmUpStats};
use crate::worker::{WarmUpCompiler, WorkerPool};

// =============================================================================
// Recording Outcomes
// =============================================================================

/// Result of flushing the recording log.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    /// Records flushed.
    pub records: usize,
    /// Encoded log size in bytes.
    pub bytes: usize,
    /// Where the log was written.
    pub path: PathBuf,
}

/// Failures on the recording flush path.
#[derive(Debug)]
pub enum RecordingError {
    /// The engine is not in recording mode.
    NotRecording,
    /// The log for this episode was already flushed.
    AlreadyFlushed,
    /// The log file could not be written.
    Io(std::io::Error),
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::NotRecording => write!(f, "engine is not in recording mode"),
            RecordingError::AlreadyFlushed => {
                write!(f, "warm-up log already flushed for this episode")
            }
            RecordingError::Io(e) => write!(f, "failed to write warm-up log: {e}"),
        }
    }
}

impl std::error::Error for RecordingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordingError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RecordingError {
    fn from(e: std::io::Error) -> Self {
        RecordingError::Io(e)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Context object for one warm-up episode.
#[derive(Debug)]
pub struct WarmUpEngine {
    config: WarmUpConfig,
    recorder: Option<Recorder>,
    scheduler: Option<ReplayScheduler>,
    table: Arc<StateTable>,
    queue: Arc<CompileQueue>,
    monitor: DeoptMonitor,
    stats: Arc<WarmUpStats>,
    startup_notified: AtomicBool,
    replay_started: AtomicBool,
    log_flushed: AtomicBool,
    workers: Mutex<Option<WorkerPool>>,
}

impl WarmUpEngine {
    /// Validate the configuration against the host flags and build the
    /// engine for the configured mode.
    pub fn new(config: WarmUpConfig, host: &HostFlags) -> Result<Self, ConfigError> {
        if let Err(e) = config.validate(host) {
            tracing::error!(error = %e, "warm-up init error");
            return Err(e);
        }

        let table = Arc::new(StateTable::new());
        let queue = Arc::new(CompileQueue::new());
        let stats = Arc::new(WarmUpStats::new());
        let recorder = (config.mode == WarmUpMode::Recording)
            .then(|| Recorder::new(config.record_window));
        let scheduler = (config.mode == WarmUpMode::Replay).then(|| {
            ReplayScheduler::new(Arc::clone(&table), Arc::clone(&queue), Arc::clone(&stats))
        });
        let monitor = DeoptMonitor::new(Arc::clone(&table), Arc::clone(&stats));

        Ok(Self {
            config,
            recorder,
            scheduler,
            table,
            queue,
            monitor,
            stats,
            startup_notified: AtomicBool::new(false),
            replay_started: AtomicBool::new(false),
            log_flushed: AtomicBool::new(false),
            workers: Mutex::new(None),
        })
    }

    /// The episode's configuration.
    #[inline]
    pub fn config(&self) -> &WarmUpConfig {
        &self.config
    }

    /// The episode's mode.
    #[inline]
    pub fn mode(&self) -> WarmUpMode {
        self.config.mode
    }

    // =========================================================================
    // Recording Phase
    // =========================================================================

    /// Record one invocation of a method. Returns `false` outside recording
    /// mode or once the window has elapsed (which also flushes the log).
    pub fn record_invocation(&self, key: &MethodKey) -> bool {
        let Some(recorder) = &self.recorder else {
            return false;
        };
        if recorder.record_invocation(key) {
            return true;
        }
        self.flush_on_window_end(recorder);
        false
    }

    /// Record a receiver shape observed at one of the method's call sites.
    /// Same acceptance rules as [`record_invocation`](Self::record_invocation).
    pub fn record_call_shape(&self, key: &MethodKey, hint: ReceiverTypeHint) -> bool {
        let Some(recorder) = &self.recorder else {
            return false;
        };
        if recorder.record_call_shape(key, hint) {
            return true;
        }
        self.flush_on_window_end(recorder);
        false
    }

    /// Seal the recording and write the log file. Explicit counterpart of
    /// the automatic window-end flush, for embedders that end recording
    /// early (application shutdown).
    pub fn finish_recording(&self) -> Result<RecordingSummary, RecordingError> {
        let recorder = self.recorder.as_ref().ok_or(RecordingError::NotRecording)?;
        self.flush_log(recorder)
    }

    /// First rejected observation after the window elapses flushes the log.
    fn flush_on_window_end(&self, recorder: &Recorder) {
        if !recorder.window_elapsed() {
            return;
        }
        match self.flush_log(recorder) {
            Ok(summary) => {
                info!(
                    records = summary.records,
                    path = %summary.path.display(),
                    "recording window elapsed, warm-up log flushed"
                );
            }
            Err(RecordingError::AlreadyFlushed) => {}
            Err(e) => warn!(error = %e, "warm-up log flush failed"),
        }
    }

    fn flush_log(&self, recorder: &Recorder) -> Result<RecordingSummary, RecordingError> {
        if self.log_flushed.swap(true, Ordering::AcqRel) {
            return Err(RecordingError::AlreadyFlushed);
        }
        let records = recorder.seal();
        let window_millis = recorder.window().as_millis().min(u64::MAX as u128) as u64;
        let bytes = codec::encode(window_millis, &records);
        // Overwrite semantics: re-running recording replaces the previous
        // episode's log.
        std::fs::write(&self.config.log_path, &bytes)?;
        info!(
            records = records.len(),
            bytes = bytes.len(),
            path = %self.config.log_path.display(),
            "warm-up log written"
        );
        Ok(RecordingSummary {
            records: records.len(),
            bytes: bytes.len(),
            path: self.config.log_path.clone(),
        })
    }

    // =========================================================================
    // Replay Phase
    // =========================================================================

    /// Load the configured log and start background warm-up compilation.
    ///
    /// Consumes the log at most once per episode. Any failure disables
    /// warm-up for the run and the host degrades to ordinary tiered
    /// compilation; no failure here is fatal.
    pub fn start_replay(
        &self,
        resolver: &dyn ProgramResolver,
        compiler: Arc<dyn WarmUpCompiler>,
    ) -> ReplayOutcome {
        let Some(scheduler) = &self.scheduler else {
            return ReplayOutcome::Disabled {
                reason: "engine is not in replay mode".to_owned(),
            };
        };
        if self.replay_started.swap(true, Ordering::AcqRel) {
            return ReplayOutcome::Disabled {
                reason: "replay already started for this episode".to_owned(),
            };
        }

        let outcome = scheduler.schedule_from_path(
            &self.config.log_path,
            resolver,
            self.config.eager_resolution,
        );
        if let ReplayOutcome::Scheduled { .. } = outcome {
            let pool = WorkerPool::spawn(
                self.config.worker_threads,
                Arc::clone(&self.queue),
                Arc::clone(&self.table),
                compiler,
                Arc::clone(&self.stats),
            );
            *self.workers.lock() = Some(pool);
        }
        outcome
    }

    /// Report a live call-site observation for a warm-compiled method.
    pub fn observe_call(&self, key: &MethodKey, observed: ReceiverTypeHint) -> ObserveOutcome {
        self.monitor.observe_call(key, observed)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Idempotent startup-done signal; see
    /// [`WarmUpHandle`](crate::lifecycle::WarmUpHandle).
    pub fn notify_startup_done(&self) {
        if !self.startup_notified.swap(true, Ordering::AcqRel) {
            info!("application startup signaled done");
        }
    }

    /// Whether startup has been signaled done.
    #[inline]
    pub fn startup_notified(&self) -> bool {
        self.startup_notified.load(Ordering::Acquire)
    }

    /// Whether warm-up compilation has finished; see
    /// [`WarmUpHandle`](crate::lifecycle::WarmUpHandle).
    pub fn is_compilation_complete(&self) -> Result<bool, LifecycleError> {
        if !self.startup_notified() {
            return Err(LifecycleError::StartupNotSignaled);
        }
        let Some(scheduler) = &self.scheduler else {
            return Err(LifecycleError::ReplayNotRequested);
        };
        scheduler
            .is_replay_complete()
            .map_err(|_| LifecycleError::ReplayNotRequested)
    }

    /// Run the end-of-warm-up sweep, if the deployment opted in and startup
    /// is done. Otherwise a warned no-op.
    pub fn deoptimize_warm_methods(&self) -> Option<SweepSummary> {
        if !self.config.explicit_deopt {
            warn!("explicit warm-up deoptimization requested but not opted in, ignored");
            return None;
        }
        if !self.startup_notified() {
            warn!("explicit warm-up deoptimization requested before startup-done, ignored");
            return None;
        }
        Some(self.monitor.sweep())
    }

    // =========================================================================
    // Introspection / Teardown
    // =========================================================================

    /// Current warm-up state of a tracked method.
    pub fn method_state(&self, key: &MethodKey) -> Option<WarmState> {
        self.table.get(key).map(|e| e.state())
    }

    /// Deoptimization events recorded for a tracked method this episode.
    pub fn deopt_count(&self, key: &MethodKey) -> u32 {
        self.table.get(key).map_or(0, |e| e.deopt_count())
    }

    /// Episode counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Abort warm-up: close the queue and retire everything still queued
    /// without compiling it. In-flight compiles run to completion.
    pub fn abort_warmup(&self) -> usize {
        match &self.scheduler {
            Some(scheduler) => scheduler.abort(),
            None => {
                self.queue.close();
                0
            }
        }
    }

    /// Tear the episode down: abort outstanding work and join the worker
    /// pool.
    pub fn shutdown(&self) {
        self.abort_warmup();
        if let Some(pool) = self.workers.lock().take() {
            pool.join();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
