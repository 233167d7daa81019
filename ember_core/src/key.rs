//! Reload-stable method identity.
//!
//! Recording and replay happen in different process instances, so a method
//! cannot be identified by any in-memory reference. A [`MethodKey`] is a value
//! type derived from structural facts: the fingerprint of the defining unit
//! (class/module) plus the method name and its parameter/return descriptor.
//! Two keys are equal iff they resolve to the same method after independent
//! program loading in a fresh run.

use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::FxHasher;

// =============================================================================
// Holder Fingerprint
// =============================================================================

/// Fingerprint of a method's defining unit.
///
/// Computed from the unit's structural content (fully-qualified name plus
/// descriptor material), never from a load-time address. `FxHasher` is
/// seed-free, so the same input produces the same fingerprint in every
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HolderFingerprint(pub u64);

impl HolderFingerprint {
    /// Fingerprint a defining unit from its canonical identity bytes.
    #[inline]
    pub fn of(identity: &[u8]) -> Self {
        let mut hasher = FxHasher::default();
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
// Method Key
// =============================================================================

/// Stable identity for a method, independent of any single loading instance.
///
/// Ordering is lexicographic over `(holder, name, descriptor)`, which matches
/// the order of the key's canonical byte encoding. Name and descriptor are
/// shared `Arc<str>`s since the same strings appear in the state table, the
/// request queue, and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    holder: HolderFingerprint,
    name: Arc<str>,
    descriptor: Arc<str>,
}

impl MethodKey {
    /// Create a key from its structural parts.
    pub fn new(
        holder: HolderFingerprint,
        name: impl Into<Arc<str>>,
        descriptor: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            holder,
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Defining-unit fingerprint.
    #[inline]
    pub const fn holder(&self) -> HolderFingerprint {
        self.holder
    }

    /// Method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter/return descriptor.
    #[inline]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Canonical byte encoding of this key.
    ///
    /// Big-endian holder fingerprint followed by NUL-terminated name and
    /// descriptor (neither may contain NUL), so byte-wise comparison of
    /// encodings agrees with `Ord`. The log codec stores the same fields with
    /// its own framing; this encoding exists for byte-comparable indexing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let desc = self.descriptor.as_bytes();
        let mut out = Vec::with_capacity(8 + name.len() + desc.len() + 2);
        out.extend_from_slice(&self.holder.0.to_be_bytes());
        out.extend_from_slice(name);
        out.push(0);
        out.extend_from_slice(desc);
        out.push(0);
        out
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}::{}{}", self.holder.0, self.name, self.descriptor)
    }
}

// =============================================================================
// Tests
// =============================================================================
