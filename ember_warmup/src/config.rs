//! Warm-up configuration.
//!
//! Flags are owned and parsed by the embedder; this module only defines the
//! validated shape the engine accepts. Validation runs before any recording
//! or replay work and never terminates the process: a failed precondition is
//! returned to the embedder, which decides whether the run continues without
//! warm-up or aborts entirely.

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Mode
// =============================================================================

/// Which half of a warm-up episode this run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmUpMode {
    /// Warm-up disabled; ordinary tiered compilation only.
    #[default]
    Off,
    /// Observe hotness and persist the log at the end of the window.
    Recording,
    /// Consume a previously recorded log and compile ahead of schedule.
    Replay,
}

// =============================================================================
// Host Flags
// =============================================================================

/// The state of host-runtime flags the engine depends on.
///
/// The embedder snapshots these from its own flag machinery. Recording
/// without interpreter profiling produces no usable data, and a method key
/// resolved against an unloaded-and-reloaded class would silently corrupt
/// the warm-up decision, so both are hard gates.
#[derive(Debug, Clone, Copy)]
pub struct HostFlags {
    /// Whether the interpreter collects invocation/type profiles.
    pub profile_interpreter: bool,
    /// Whether the host may unload classes during this run.
    pub class_unloading: bool,
}

// =============================================================================
// Configuration
// =============================================================================

/// Validated warm-up configuration for one episode.
#[derive(Debug, Clone)]
pub struct WarmUpConfig {
    /// Episode mode.
    pub mode: WarmUpMode,
    /// Length of the recording time window. Once elapsed, the recorder stops
    /// accepting new records and the log is flushed.
    pub record_window: Duration,
    /// Path of the warm-up log. Written once per recording episode
    /// (overwriting any previous log), read once at replay start.
    pub log_path: PathBuf,
    /// Opt-in for the explicit end-of-warm-up deoptimization sweep.
    pub explicit_deopt: bool,
    /// Opt-in for eager resolution of recorded classes at replay start.
    pub eager_resolution: bool,
    /// Number of background compiler worker threads.
    pub worker_threads: usize,
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            mode: WarmUpMode::Off,
            record_window: Duration::from_secs(600),
            log_path: PathBuf::from("warmup.log"),
            explicit_deopt: false,
            eager_resolution: false,
            worker_threads: 2,
        }
    }
}

impl WarmUpConfig {
    /// Recording-mode configuration for a given log path.
    pub fn recording(log_path: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            mode: WarmUpMode::Recording,
            record_window: window,
            log_path: log_path.into(),
            ..Default::default()
        }
    }

    /// Replay-mode configuration for a given log path.
    pub fn replay(log_path: impl Into<PathBuf>) -> Self {
        Self {
            mode: WarmUpMode::Replay,
            log_path: log_path.into(),
            ..Default::default()
        }
    }

    /// Validate against the host flag snapshot.
    ///
    /// Must pass before the engine is constructed. Each violation is a
    /// distinct fatal configuration error naming the offending flag.
    pub fn validate(&self, host: &HostFlags) -> Result<(), ConfigError> {
        if self.mode == WarmUpMode::Off {
            return Ok(());
        }
        if self.mode == WarmUpMode::Recording && !host.profile_interpreter {
            return Err(ConfigError::ProfilingDisabled);
        }
        if host.class_unloading {
            return Err(ConfigError::ClassUnloadingEnabled);
        }
        if self.mode == WarmUpMode::Recording && self.record_window.is_zero() {
            return Err(ConfigError::EmptyRecordWindow);
        }
        if self.mode == WarmUpMode::Replay && self.worker_threads == 0 {
            return Err(ConfigError::NoWorkerThreads);
        }
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Fatal configuration errors.
///
/// Reported to the embedder before any log I/O or scheduling happens. The
/// engine itself never exits the process over these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Recording requires interpreter profiling to be enabled.
    ProfilingDisabled,
    /// Class unloading must be off while recording or replaying.
    ClassUnloadingEnabled,
    /// The recording window must be non-zero.
    EmptyRecordWindow,
    /// Replay needs at least one compiler worker.
    NoWorkerThreads,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ProfilingDisabled => {
                write!(f, "flag ProfileInterpreter must be on for recording")
            }
            ConfigError::ClassUnloadingEnabled => {
                write!(f, "flag ClassUnloading must be off while warm-up is active")
            }
            ConfigError::EmptyRecordWindow => {
                write!(f, "recording window must be greater than zero")
            }
            ConfigError::NoWorkerThreads => {
                write!(f, "replay requires at least one compiler worker thread")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILED_HOST: HostFlags = HostFlags {
        profile_interpreter: true,
        class_unloading: false,
    };

    #[test]
    fn test_off_mode_always_valid() {
        let config = WarmUpConfig::default();
        let host = HostFlags {
            profile_interpreter: false,
            class_unloading: true,
        };
        assert!(config.validate(&host).is_ok());
    }

    #[test]
    fn test_recording_requires_profiling() {
        let config = WarmUpConfig::recording("warmup.log", Duration::from_secs(10));
        let host = HostFlags {
            profile_interpreter: false,
            class_unloading: false,
        };
        assert_eq!(config.validate(&host), Err(ConfigError::ProfilingDisabled));
    }

    #[test]
    fn test_recording_requires_no_class_unloading() {
        let config = WarmUpConfig::recording("warmup.log", Duration::from_secs(10));
        let host = HostFlags {
            profile_interpreter: true,
            class_unloading: true,
        };
        assert_eq!(
            config.validate(&host),
            Err(ConfigError::ClassUnloadingEnabled)
        );
    }

    #[test]
    fn test_replay_requires_no_class_unloading() {
        let config = WarmUpConfig::replay("warmup.log");
        let host = HostFlags {
            profile_interpreter: false,
            class_unloading: true,
        };
        assert_eq!(
            config.validate(&host),
            Err(ConfigError::ClassUnloadingEnabled)
        );
    }

    #[test]
    fn test_replay_without_profiling_is_valid() {
        // Profiling gates only the recording side.
        let config = WarmUpConfig::replay("warmup.log");
        let host = HostFlags {
            profile_interpreter: false,
            class_unloading: false,
        };
        assert!(config.validate(&host).is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = WarmUpConfig::recording("warmup.log", Duration::ZERO);
        assert_eq!(
            config.validate(&PROFILED_HOST),
            Err(ConfigError::EmptyRecordWindow)
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = WarmUpConfig {
            worker_threads: 0,
            ..WarmUpConfig::replay("warmup.log")
        };
        assert_eq!(
            config.validate(&PROFILED_HOST),
            Err(ConfigError::NoWorkerThreads)
        );
    }

    #[test]
    fn test_error_messages_name_the_flag() {
        assert!(ConfigError::ProfilingDisabled
            .to_string()
            .contains("ProfileInterpreter"));
        assert!(ConfigError::ClassUnloadingEnabled
            .to_string()
            .contains("ClassUnloading"));
    }
}
