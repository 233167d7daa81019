//! Application-facing lifecycle API.
//!
//! A thin, permission-gated handle over the engine. The application uses it
//! to signal that startup is done, to poll whether warm-up compilation has
//! finished, and (where the deployment opted in) to request the
//! end-of-warm-up deoptimization sweep.
//!
//! The completion query is a non-blocking poll by contract; callers loop
//! with their own backoff. Calling it before startup was signaled is a
//! programming error in the caller and is reported as such, distinct from
//! the recoverable runtime conditions the engine degrades over.

use std::sync::Arc;

use crate::engine::WarmUpEngine;
use crate::monitor::SweepSummary;

/// Permission required to acquire a [`WarmUpHandle`].
pub const WARMUP_CONTROL_PERMISSION: &str = "warmUpControl";

// =============================================================================
// Permission Boundary
// =============================================================================

/// The deployment's access-control policy, at its interface boundary.
pub trait PermissionChecker {
    /// Check whether the calling context holds the named permission.
    fn check(&self, permission: &str) -> Result<(), AccessError>;
}

/// Policy for deployments without an active security manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check(&self, _permission: &str) -> Result<(), AccessError> {
        Ok(())
    }
}

/// Denied access to the lifecycle API. Never silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessError {
    permission: String,
}

impl AccessError {
    /// Denial of the named permission.
    pub fn denied(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
        }
    }

    /// The permission that was denied.
    pub fn permission(&self) -> &str {
        &self.permission
    }
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "access denied: missing permission \"{}\"", self.permission)
    }
}

impl std::error::Error for AccessError {}

// =============================================================================
// Lifecycle Errors
// =============================================================================

/// Caller bugs, signaled synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// The completion query ran before any `notify_startup_done` call.
    StartupNotSignaled,
    /// The completion query ran in an episode that never requested replay
    /// (recording run, or warm-up off).
    ReplayNotRequested,
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::StartupNotSignaled => write!(
                f,
                "is_compilation_complete() requires a prior notify_startup_done() call"
            ),
            LifecycleError::ReplayNotRequested => {
                write!(f, "no warm-up replay was requested in this episode")
            }
        }
    }
}

impl std::error::Error for LifecycleError {}

// =============================================================================
// Handle
// =============================================================================

/// Permission-gated application handle to the warm-up engine.
#[derive(Debug, Clone)]
pub struct WarmUpHandle {
    engine: Arc<WarmUpEngine>,
}

impl WarmUpHandle {
    /// Acquire a handle, checking the caller's permission first. Denial is
    /// an explicit failure, never a silently inert handle.
    pub fn acquire(
        engine: Arc<WarmUpEngine>,
        permissions: &dyn PermissionChecker,
    ) -> Result<Self, AccessError> {
        permissions.check(WARMUP_CONTROL_PERMISSION)?;
        Ok(Self { engine })
    }

    /// Signal that application startup is done. Idempotent: the first call
    /// lets the engine finalize the replay episode, later calls do nothing.
    pub fn notify_startup_done(&self) {
        self.engine.notify_startup_done();
    }

    /// Whether warm-up compilation has finished. Valid only after
    /// [`notify_startup_done`](Self::notify_startup_done).
    pub fn is_compilation_complete(&self) -> Result<bool, LifecycleError> {
        self.engine.is_compilation_complete()
    }

    /// Request the end-of-warm-up sweep. A no-op (returning `None`) unless
    /// the deployment opted into explicit deoptimization and startup has
    /// been signaled done.
    pub fn notify_deoptimize_warm_methods(&self) -> Option<SweepSummary> {
        self.engine.deoptimize_warm_methods()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;

    impl PermissionChecker for DenyAll {
        fn check(&self, permission: &str) -> Result<(), AccessError> {
            Err(AccessError::denied(permission))
        }
    }

    fn engine() -> Arc<WarmUpEngine> {
        use crate::config::{HostFlags, WarmUpConfig};
        let host = HostFlags {
            profile_interpreter: true,
            class_unloading: false,
        };
        Arc::new(WarmUpEngine::new(WarmUpConfig::default(), &host).unwrap())
    }

    #[test]
    fn test_acquire_with_permission() {
        assert!(WarmUpHandle::acquire(engine(), &AllowAll).is_ok());
    }

    #[test]
    fn test_acquire_denied_is_explicit() {
        let err = WarmUpHandle::acquire(engine(), &DenyAll).unwrap_err();
        assert_eq!(err.permission(), WARMUP_CONTROL_PERMISSION);
        assert!(err.to_string().contains("warmUpControl"));
    }

    #[test]
    fn test_completion_before_startup_is_usage_error() {
        let handle = WarmUpHandle::acquire(engine(), &AllowAll).unwrap();
        assert_eq!(
            handle.is_compilation_complete(),
            Err(LifecycleError::StartupNotSignaled)
        );
    }
}
