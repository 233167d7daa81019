//! Record/replay warm-up compilation coordinator.
//!
//! Decouples *when hot code is discovered* from *when it is compiled*. A
//! recording run observes which methods get hot during startup and persists
//! that to a log; a later run replays the log to trigger optimizing
//! compilation ahead of the normal tiered counters, then discards the
//! speculative compiles once their assumptions stop holding.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │ Recording run                                                         │
//! │   interpreter hooks ──▶ Recorder ──seal──▶ codec ──▶ log file         │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │ Replay run                                                            │
//! │   log file ──▶ ReplayScheduler ──▶ StateTable ──▶ CompileQueue        │
//! │                                        │               │              │
//! │                                        │         worker pool ──▶      │
//! │                                        │         WarmUpCompiler       │
//! │   hot call path ──▶ DeoptMonitor ──────┘                              │
//! │   application   ──▶ lifecycle handle (startup done / complete / deopt)│
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate may terminate the hosting process. Configuration
//! precondition violations are surfaced to the embedder before any warm-up
//! work begins; everything else degrades to "behave as if warm-up were
//! absent".
#![deny(unsafe_op_in_unsafe_fn)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod monitor;
pub mod queue;
pub mod recorder;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod worker;

pub use codec::{DecodeError, DecodedLog, LogHeader, FORMAT_VERSION};
pub use config::{ConfigError, HostFlags, WarmUpConfig, WarmUpMode};
pub use engine::{RecordingError, RecordingSummary, WarmUpEngine};
pub use lifecycle::{
    AccessError, AllowAll, LifecycleError, PermissionChecker, WarmUpHandle,
    WARMUP_CONTROL_PERMISSION,
};
pub use monitor::{DeoptMonitor, ObserveOutcome, SweepSummary, DEFAULT_VERIFY_THRESHOLD};
pub use queue::{CompileQueue, CompileRequest};
pub use recorder::Recorder;
pub use scheduler::{ProgramResolver, ReplayOutcome, ReplayScheduler, ReplayStateError};
pub use state::{DeoptReason, MethodEntry, StateTable, WarmState};
pub use stats::{StatsSnapshot, WarmUpStats};
pub use worker::{CompileError, WarmUpCompiler, WorkerPool};
