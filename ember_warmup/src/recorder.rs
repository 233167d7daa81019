//! Recording-phase hotness collector.
//!
//! Accumulates warm-up records during application startup. The recorder
//! accepts input only inside its time window; once the window elapses (or
//! [`seal`](Recorder::seal) is called explicitly) it stops accepting new
//! observations and the accumulated set is frozen for flushing.
//!
//! Record order matters: the first-seen order of methods is persisted to the
//! log and later used as the stable tie-break when replay sorts by observed
//! hotness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ember_core::{CallSiteShapes, MethodKey, ReceiverTypeHint, WarmUpRecord};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

// =============================================================================
// Recorder
// =============================================================================

/// Collector for one recording episode.
///
/// Thread-safe; interpreter threads report invocations and call-site shapes
/// concurrently. The window cutoff is checked on entry, so no timer thread
/// is needed; the first observation after the deadline seals the recorder.
#[derive(Debug)]
pub struct Recorder {
    window: Duration,
    started: Instant,
    sealed: AtomicBool,
    inner: Mutex<RecorderInner>,
}

#[derive(Debug, Default)]
struct RecorderInner {
    drafts: FxHashMap<MethodKey, Draft>,
    /// Keys in first-seen order.
    order: Vec<MethodKey>,
}

#[derive(Debug, Default)]
struct Draft {
    shapes: CallSiteShapes,
    weight: u64,
}

impl Recorder {
    /// Start a recording episode with the given time window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            sealed: AtomicBool::new(false),
            inner: Mutex::new(RecorderInner::default()),
        }
    }

    /// Record one invocation of a method. Returns `false` once the window
    /// has elapsed or the recorder was sealed.
    pub fn record_invocation(&self, key: &MethodKey) -> bool {
        if !self.accepting() {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.draft_mut(key).weight += 1;
        true
    }

    /// Record a receiver shape observed at one of the method's call sites.
    /// Returns `false` once the window has elapsed or the recorder was
    /// sealed.
    pub fn record_call_shape(&self, key: &MethodKey, hint: ReceiverTypeHint) -> bool {
        if !self.accepting() {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.draft_mut(key).shapes.insert(hint);
        true
    }

    /// Whether the recorder still accepts observations.
    pub fn accepting(&self) -> bool {
        if self.sealed.load(Ordering::Acquire) {
            return false;
        }
        if self.started.elapsed() >= self.window {
            self.sealed.store(true, Ordering::Release);
            return false;
        }
        true
    }

    /// Whether the time window has elapsed.
    #[inline]
    pub fn window_elapsed(&self) -> bool {
        self.started.elapsed() >= self.window
    }

    /// The configured window length.
    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of distinct methods recorded so far.
    pub fn len(&self) -> usize {
        self.inner.lock().drafts.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seal the episode and take the accumulated records in first-seen
    /// order. Idempotent; a second call returns an empty set.
    pub fn seal(&self) -> Vec<WarmUpRecord> {
        self.sealed.store(true, Ordering::Release);
        let mut inner = self.inner.lock();
        let order = std::mem::take(&mut inner.order);
        let mut drafts = std::mem::take(&mut inner.drafts);
        order
            .into_iter()
            .filter_map(|key| {
                let draft = drafts.remove(&key)?;
                Some(WarmUpRecord::new(key, draft.shapes, draft.weight))
            })
            .collect()
    }
}

impl RecorderInner {
    fn draft_mut(&mut self, key: &MethodKey) -> &mut Draft {
        use std::collections::hash_map::Entry;
        match self.drafts.entry(key.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.order.push(key.clone());
                e.insert(Draft::default())
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
    use ember_core::{HolderFingerprint, TypeFingerprint};

    fn key(name: &str) -> MethodKey {
        MethodKey::new(HolderFingerprint::of(b"com/example/A"), name, "()V")
    }

    fn long_window() -> Recorder {
        Recorder::new(Duration::from_secs(3600))
    }

    #[test]
    fn test_weights_accumulate() {
        let recorder = long_window();
        let k = key("foo");
        for _ in 0..5 {
            assert!(recorder.record_invocation(&k));
        }
        let records = recorder.seal();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].invocation_weight, 5);
    }

    #[test]
    fn test_shapes_dedup_per_method() {
        let recorder = long_window();
        let k = key("foo");
        let a = ReceiverTypeHint::Concrete(TypeFingerprint::of(b"A"));
        recorder.record_call_shape(&k, a);
        recorder.record_call_shape(&k, a);
        recorder.record_call_shape(&k, ReceiverTypeHint::NullSeen);

        let records = recorder.seal();
        assert_eq!(records[0].shapes.len(), 2);
    }

    #[test]
    fn test_first_seen_order_preserved() {
        let recorder = long_window();
        for name in ["c", "a", "b"] {
            recorder.record_invocation(&key(name));
        }
        // More traffic on a later method must not reorder the log.
        recorder.record_invocation(&key("b"));

        let names: Vec<_> = recorder
            .seal()
            .into_iter()
            .map(|r| r.key.name().to_owned())
            .collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn test_elapsed_window_rejects_input() {
        let recorder = Recorder::new(Duration::ZERO);
        assert!(!recorder.record_invocation(&key("foo")));
        assert!(!recorder.record_call_shape(&key("foo"), ReceiverTypeHint::NullSeen));
        assert!(recorder.seal().is_empty());
    }

    #[test]
    fn test_seal_is_idempotent() {
        let recorder = long_window();
        recorder.record_invocation(&key("foo"));
        assert_eq!(recorder.seal().len(), 1);
        assert!(recorder.seal().is_empty());
        // Sealed recorders reject further input.
        assert!(!recorder.record_invocation(&key("bar")));
    }

    #[test]
    fn test_concurrent_recording() {
        use std::sync::Arc;
        use std::thread;

        let recorder = Arc::new(long_window());
        let mut handles = vec![];
        for t in 0..4 {
            let recorder = Arc::clone(&recorder);
            handles.push(thread::spawn(move || {
                let k = key(&format!("m{t}"));
                for _ in 0..250 {
                    recorder.record_invocation(&k);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let records = recorder.seal();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.invocation_weight == 250));
    }
}
