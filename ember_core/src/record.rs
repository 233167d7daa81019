//! Persisted warm-up records.

use crate::hint::CallSiteShapes;
use crate::key::MethodKey;

/// One entry in the persisted warm-up log.
///
/// Created only during the recording phase and immutable once flushed. The
/// `invocation_weight` is the observed hotness used to order replay-time
/// compilation; `shapes` become the compile-time assumptions of the warm
/// compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmUpRecord {
    /// Reload-stable identity of the recorded method.
    pub key: MethodKey,
    /// Receiver shapes observed at the method's interesting call sites.
    pub shapes: CallSiteShapes,
    /// Accumulated invocation count over the recording window.
    pub invocation_weight: u64,
}

impl WarmUpRecord {
    /// Create a record.
    pub fn new(key: MethodKey, shapes: CallSiteShapes, invocation_weight: u64) -> Self {
        Self {
            key,
            shapes,
            invocation_weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hint::{ReceiverTypeHint, TypeFingerprint};
    use crate::key::HolderFingerprint;

    #[test]
    fn test_record_construction() {
        let key = MethodKey::new(HolderFingerprint::of(b"a/A"), "foo", "()V");
        let shapes: CallSiteShapes =
            [ReceiverTypeHint::Concrete(TypeFingerprint::of(b"a/A"))]
                .into_iter()
                .collect();
        let record = WarmUpRecord::new(key.clone(), shapes, 20_000);
        assert_eq!(record.key, key);
        assert_eq!(record.invocation_weight, 20_000);
        assert!(record.shapes.has_assumptions());
    }
}
