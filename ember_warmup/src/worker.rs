//! Background compiler workers.
//!
//! A fixed-size pool of threads consumes the compile request queue. Each
//! worker claims an entry, invokes the external compiler with the recorded
//! call-site shapes as compilation-time assumptions, and publishes the
//! outcome to the state table. A failed compile retires that one method and
//! nothing else; the pool keeps running.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ember_core::{CallSiteShapes, CodeRef, MethodKey};
use tracing::{debug, trace};

use crate::queue::CompileQueue;
use crate::state::StateTable;
use crate::stats::WarmUpStats;

// =============================================================================
// Compiler Boundary
// =============================================================================

/// The external optimizing compiler, at its interface boundary.
///
/// Implementations receive the resolver's handle for the method plus the
/// assumption set from the originating record, and either produce installed
/// optimized code or report why they could not (for example the method body
/// changed incompatibly since recording).
pub trait WarmUpCompiler: Send + Sync {
    /// Compile one method with the given baked-in assumptions.
    fn compile(
        &self,
        method: CodeRef,
        key: &MethodKey,
        assumptions: &CallSiteShapes,
    ) -> Result<CodeRef, CompileError>;
}

/// Why a warm-up compile failed. Carries the compiler's own message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    message: String,
}

impl CompileError {
    /// Create a failure with the compiler's reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The compiler's reason.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "warm-up compile failed: {}", self.message)
    }
}

impl std::error::Error for CompileError {}

// =============================================================================
// Worker Pool
// =============================================================================

/// Handle to the spawned compiler worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers over the given queue.
    ///
    /// Workers exit when the queue is closed. They never panic the process
    /// over a compile failure.
    pub fn spawn(
        count: usize,
        queue: Arc<CompileQueue>,
        table: Arc<StateTable>,
        compiler: Arc<dyn WarmUpCompiler>,
        stats: Arc<WarmUpStats>,
    ) -> Self {
        let handles = (0..count)
            .filter_map(|i| {
                let queue = Arc::clone(&queue);
                let table = Arc::clone(&table);
                let compiler = Arc::clone(&compiler);
                let stats = Arc::clone(&stats);
                let spawned = thread::Builder::new()
                    .name(format!("warmup-compiler-{i}"))
                    .spawn(move || run_worker(&queue, &table, &*compiler, &stats));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        // The pool runs degraded rather than taking the
                        // process down.
                        tracing::error!(error = %e, "failed to spawn warm-up compiler worker");
                        None
                    }
                }
            })
            .collect();
        Self { handles }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for all workers to exit. Call after closing the queue.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_worker(
    queue: &CompileQueue,
    table: &StateTable,
    compiler: &dyn WarmUpCompiler,
    stats: &WarmUpStats,
) {
    while let Some(request) = queue.dequeue() {
        let Some(entry) = table.get(&request.key) else {
            continue;
        };
        if !table.begin_compile(&entry) {
            // Lost the claim; the entry was drained or already taken.
            continue;
        }
        trace!(method = %entry.key(), weight = entry.weight(), "warm-up compile start");

        match compiler.compile(entry.resolved(), entry.key(), entry.shapes()) {
            Ok(code) => {
                if table.complete_compile(&entry, code) {
                    stats.note_compiled();
                }
            }
            Err(err) => {
                debug!(method = %entry.key(), reason = %err, "warm-up compile failed");
                if table.fail_compile(&entry, err.message().to_owned()) {
                    stats.note_compile_failure();
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WarmState;
    use ember_core::HolderFingerprint;
    use std::time::Duration;

    fn key(name: &str) -> MethodKey {
        MethodKey::new(HolderFingerprint::of(b"a/A"), name, "()V")
    }

    /// Compiler that succeeds for every method except those whose name
    /// starts with "bad".
    struct TestCompiler;

    impl WarmUpCompiler for TestCompiler {
        fn compile(
            &self,
            method: CodeRef,
            key: &MethodKey,
            _assumptions: &CallSiteShapes,
        ) -> Result<CodeRef, CompileError> {
            if key.name().starts_with("bad") {
                Err(CompileError::new("method body changed"))
            } else {
                Ok(CodeRef(method.as_u64() + 1000))
            }
        }
    }

    fn queue_method(
        table: &StateTable,
        queue: &CompileQueue,
        name: &str,
        id: u64,
    ) -> Arc<crate::state::MethodEntry> {
        let entry =
            table.insert_resolved(key(name), CallSiteShapes::new(), id, CodeRef(id));
        table.promote_to_queued(&entry);
        queue.enqueue(key(name), id);
        entry
    }

    fn wait_until_settled(table: &StateTable) {
        for _ in 0..1000 {
            if table.pending_count() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("workers did not settle");
    }

    #[test]
    fn test_workers_compile_queued_entries() {
        let queue = Arc::new(CompileQueue::new());
        let table = Arc::new(StateTable::new());
        let stats = Arc::new(WarmUpStats::new());

        let a = queue_method(&table, &queue, "foo", 1);
        let b = queue_method(&table, &queue, "bar", 2);

        let pool = WorkerPool::spawn(
            2,
            Arc::clone(&queue),
            Arc::clone(&table),
            Arc::new(TestCompiler),
            Arc::clone(&stats),
        );
        wait_until_settled(&table);
        queue.close();
        pool.join();

        assert_eq!(a.state(), WarmState::CompiledWarm);
        assert_eq!(a.compiled(), Some(CodeRef(1001)));
        assert_eq!(b.state(), WarmState::CompiledWarm);
        assert_eq!(stats.snapshot().compiled, 2);
    }

    #[test]
    fn test_failure_is_isolated() {
        let queue = Arc::new(CompileQueue::new());
        let table = Arc::new(StateTable::new());
        let stats = Arc::new(WarmUpStats::new());

        let bad = queue_method(&table, &queue, "bad_apple", 9);
        let good = queue_method(&table, &queue, "good", 1);

        let pool = WorkerPool::spawn(
            1,
            Arc::clone(&queue),
            Arc::clone(&table),
            Arc::new(TestCompiler),
            Arc::clone(&stats),
        );
        wait_until_settled(&table);
        queue.close();
        pool.join();

        assert_eq!(bad.state(), WarmState::Retired);
        assert_eq!(bad.failure().as_deref(), Some("method body changed"));
        assert_eq!(good.state(), WarmState::CompiledWarm);

        let snap = stats.snapshot();
        assert_eq!(snap.compiled, 1);
        assert_eq!(snap.compile_failures, 1);
    }

    #[test]
    fn test_workers_exit_on_close() {
        let queue = Arc::new(CompileQueue::new());
        let table = Arc::new(StateTable::new());
        let pool = WorkerPool::spawn(
            3,
            Arc::clone(&queue),
            Arc::clone(&table),
            Arc::new(TestCompiler),
            Arc::new(WarmUpStats::new()),
        );
        assert_eq!(pool.size(), 3);
        queue.close();
        pool.join();
    }
}
