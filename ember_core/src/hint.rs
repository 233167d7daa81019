//! Call-site shape hints.
//!
//! During recording, each interesting virtual call site contributes an
//! approximation of the concrete receiver types it saw. The replay compiler
//! bakes those hints in as speculation; the deoptimization monitor checks
//! live traffic against the same hints. A site with no observations carries
//! no assumption and can never be violated.

use smallvec::SmallVec;

// =============================================================================
// Type Fingerprint
// =============================================================================

/// Fingerprint of a concrete receiver type, stable across runs.
///
/// Same derivation as [`HolderFingerprint`](crate::key::HolderFingerprint):
/// seed-free hash of the type's canonical identity bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TypeFingerprint(pub u64);

impl TypeFingerprint {
    /// Fingerprint a type from its canonical identity bytes.
    #[inline]
    pub fn of(identity: &[u8]) -> Self {
        use std::hash::Hasher;
        let mut hasher = rustc_hash::FxHasher::default();
        hasher.write(identity);
        Self(hasher.finish())
    }

    /// Raw fingerprint value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

// =============================================================================
// Receiver Type Hint
// =============================================================================

/// One observation (or non-observation) of a call-site receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverTypeHint {
    /// No receiver observed at this site during recording.
    Unobserved,
    /// A null receiver was seen at this site.
    NullSeen,
    /// A concrete receiver type was seen.
    Concrete(TypeFingerprint),
}

impl ReceiverTypeHint {
    /// Wire tag for the log codec.
    #[inline]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Unobserved => 0,
            Self::NullSeen => 1,
            Self::Concrete(_) => 2,
        }
    }

    /// Reconstruct from a wire tag and optional fingerprint payload.
    #[inline]
    pub const fn from_tag(tag: u8, payload: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::Unobserved),
            1 => Some(Self::NullSeen),
            2 => Some(Self::Concrete(TypeFingerprint(payload))),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReceiverTypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unobserved => write!(f, "unobserved"),
            Self::NullSeen => write!(f, "null"),
            Self::Concrete(t) => write!(f, "type:{:016x}", t.0),
        }
    }
}

// =============================================================================
// Call-Site Shapes
// =============================================================================

/// The set of receiver shapes observed for one method during recording.
///
/// Monomorphic sites (the common case) hold a single entry, so entries are
/// kept inline. The set doubles as the compiled method's assumption set: a
/// live observation [`matches`](Self::matches) iff the recording saw the same
/// shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSiteShapes {
    shapes: SmallVec<[ReceiverTypeHint; 2]>,
}

impl CallSiteShapes {
    /// Empty shape set (no assumptions).
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observed shape. Duplicates are ignored.
    pub fn insert(&mut self, hint: ReceiverTypeHint) {
        if !self.shapes.contains(&hint) {
            self.shapes.push(hint);
        }
    }

    /// Whether a live observation is covered by the recorded assumptions.
    ///
    /// A set with no concrete data (empty, or only [`Unobserved`] entries)
    /// constrains nothing and matches every observation. `Unobserved` as a
    /// live value never violates an assumption either: there is nothing to
    /// check against.
    ///
    /// [`Unobserved`]: ReceiverTypeHint::Unobserved
    pub fn matches(&self, observed: ReceiverTypeHint) -> bool {
        if observed == ReceiverTypeHint::Unobserved || !self.has_assumptions() {
            return true;
        }
        self.shapes.contains(&observed)
    }

    /// Whether the set carries any checkable assumption.
    #[inline]
    pub fn has_assumptions(&self) -> bool {
        self.shapes
            .iter()
            .any(|s| *s != ReceiverTypeHint::Unobserved)
    }

    /// Iterate over the recorded shapes.
    pub fn iter(&self) -> impl Iterator<Item = ReceiverTypeHint> + '_ {
        self.shapes.iter().copied()
    }

    /// Number of recorded shapes.
    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Whether no shape was recorded at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl FromIterator<ReceiverTypeHint> for CallSiteShapes {
    fn from_iter<T: IntoIterator<Item = ReceiverTypeHint>>(iter: T) -> Self {
        let mut shapes = Self::new();
        for hint in iter {
            shapes.insert(hint);
        }
        shapes
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn concrete(name: &str) -> ReceiverTypeHint {
        ReceiverTypeHint::Concrete(TypeFingerprint::of(name.as_bytes()))
    }

    #[test]
    fn test_tag_round_trip() {
        for hint in [
            ReceiverTypeHint::Unobserved,
            ReceiverTypeHint::NullSeen,
            concrete("com/example/Widget"),
        ] {
            let payload = match hint {
                ReceiverTypeHint::Concrete(t) => t.0,
                _ => 0,
            };
            assert_eq!(ReceiverTypeHint::from_tag(hint.tag(), payload), Some(hint));
        }
        assert_eq!(ReceiverTypeHint::from_tag(7, 0), None);
    }

    #[test]
    fn test_insert_dedups() {
        let mut shapes = CallSiteShapes::new();
        shapes.insert(concrete("A"));
        shapes.insert(concrete("A"));
        shapes.insert(ReceiverTypeHint::NullSeen);
        assert_eq!(shapes.len(), 2);
    }

    #[test]
    fn test_monomorphic_match() {
        let shapes: CallSiteShapes = [concrete("A")].into_iter().collect();
        assert!(shapes.matches(concrete("A")));
        assert!(!shapes.matches(concrete("B")));
        assert!(!shapes.matches(ReceiverTypeHint::NullSeen));
    }

    #[test]
    fn test_null_seen_during_recording_matches_null() {
        let shapes: CallSiteShapes = [concrete("A"), ReceiverTypeHint::NullSeen]
            .into_iter()
            .collect();
        assert!(shapes.matches(ReceiverTypeHint::NullSeen));
    }

    #[test]
    fn test_no_assumptions_matches_everything() {
        let empty = CallSiteShapes::new();
        assert!(empty.matches(concrete("A")));
        assert!(empty.matches(ReceiverTypeHint::NullSeen));

        let unobserved: CallSiteShapes =
            [ReceiverTypeHint::Unobserved].into_iter().collect();
        assert!(!unobserved.has_assumptions());
        assert!(unobserved.matches(concrete("A")));
    }

    #[test]
    fn test_unobserved_live_value_never_violates() {
        let shapes: CallSiteShapes = [concrete("A")].into_iter().collect();
        assert!(shapes.matches(ReceiverTypeHint::Unobserved));
    }
}
