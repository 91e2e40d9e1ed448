//! Session keys and key generation policies.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rand::Rng;

use crate::error::{Error, Result};

// ============================================================================
// SessionKey
// ============================================================================

/// Fixed-length opaque key identifying a registered session.
///
/// Displayed as lowercase hex, which is also the form clients put in the
/// request path.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(Box<[u8]>);

impl SessionKey {
    /// Wraps raw key bytes.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Parses a hex key and checks it has the expected length in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the input is not hex or the decoded
    /// length differs from `expected_len`.
    pub fn from_hex(input: &str, expected_len: usize) -> Result<Self> {
        let bytes = hex::decode(input)
            .map_err(|e| Error::invalid_key(format!("{input:?} is not hex: {e}")))?;

        if bytes.len() != expected_len {
            return Err(Error::invalid_key(format!(
                "expected {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self(bytes.into_boxed_slice()))
    }

    /// Returns the raw key bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the key length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for a zero-length key.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the lowercase hex form of the key.
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<u8> for SessionKey {
    fn from(id: u8) -> Self {
        Self(Box::new([id]))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.to_hex())
    }
}

// ============================================================================
// KeyPolicy
// ============================================================================

/// How a table picks the next candidate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyPolicy {
    /// Uniformly random bytes, retried on collision.
    Random,
    /// One-byte ids from a counter over `1..=255` that wraps and never
    /// yields 0.
    Sequential,
}

// ============================================================================
// KeyGenerator
// ============================================================================

/// Number of distinct ids a sequential generator can issue.
const SEQUENTIAL_CAPACITY: u64 = u8::MAX as u64;

/// Produces candidate keys.
#[derive(Debug, Clone)]
pub(crate) struct KeyGenerator {
    policy: KeyPolicy,
    length: usize,
    /// Last id handed out by the sequential policy.
    cursor: u8,
}

impl KeyGenerator {
    /// Creates a generator of random keys of `length` bytes.
    pub(crate) fn random(length: usize) -> Self {
        debug_assert!(length > 0, "key length must be non-zero");
        Self {
            policy: KeyPolicy::Random,
            length,
            cursor: 0,
        }
    }

    /// Creates a generator of one-byte ids starting at 1.
    pub(crate) fn sequential() -> Self {
        Self {
            policy: KeyPolicy::Sequential,
            length: 1,
            cursor: 0,
        }
    }

    #[inline]
    pub(crate) fn length(&self) -> usize {
        self.length
    }

    /// Number of candidates worth trying before the key space is full.
    pub(crate) fn capacity(&self) -> u64 {
        match self.policy {
            KeyPolicy::Random => u64::MAX,
            KeyPolicy::Sequential => SEQUENTIAL_CAPACITY,
        }
    }

    /// Returns the next candidate key.
    pub(crate) fn next_key(&mut self) -> SessionKey {
        match self.policy {
            KeyPolicy::Random => {
                let mut bytes = vec![0u8; self.length];
                rand::rng().fill(bytes.as_mut_slice());
                SessionKey::from_bytes(bytes)
            }
            KeyPolicy::Sequential => {
                self.cursor = self.cursor.checked_add(1).unwrap_or(1);
                SessionKey::from(self.cursor)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
