//! Key tables: the single-owner [`KeyTable`] and the shared [`Registry`].
//!
//! Both issue collision-free keys of a configured length. The table is
//! mutated through `&mut self` by exactly one task (a host's event loop);
//! the registry wraps a table in a reader/writer lock so unrelated sessions
//! can register and resolve keys concurrently.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};

use super::key::{KeyGenerator, SessionKey};

// ============================================================================
// KeyTable
// ============================================================================

/// Unlocked key → value map that generates its own keys.
#[derive(Debug)]
pub struct KeyTable<V> {
    generator: KeyGenerator,
    entries: FxHashMap<SessionKey, V>,
}

impl<V> KeyTable<V> {
    /// Creates an empty table issuing random keys of `key_length` bytes.
    #[must_use]
    pub fn random(key_length: usize) -> Self {
        Self::with_generator(KeyGenerator::random(key_length))
    }

    /// Creates an empty table issuing one-byte ids from 1 to 255.
    #[must_use]
    pub fn sequential() -> Self {
        Self::with_generator(KeyGenerator::sequential())
    }

    fn with_generator(generator: KeyGenerator) -> Self {
        Self {
            generator,
            entries: FxHashMap::default(),
        }
    }

    /// Returns the length of issued keys.
    #[inline]
    #[must_use]
    pub fn key_length(&self) -> usize {
        self.generator.length()
    }

    /// Inserts `value` under a fresh key and returns the key.
    ///
    /// Random tables retry until an unused key is drawn. Sequential tables
    /// scan forward from the last issued key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryFull`] when a sequential table has no free key.
    pub fn insert(&mut self, value: V) -> Result<SessionKey> {
        let attempts = self.generator.capacity();

        let mut tried = 0u64;
        while tried < attempts {
            let key = self.generator.next_key();
            if !self.entries.contains_key(&key) {
                self.entries.insert(key.clone(), value);
                return Ok(key);
            }
            tried += 1;
            trace!(%key, "Key collision, retrying");
        }

        Err(Error::registry_full(attempts))
    }

    /// Returns the value registered under `key`.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<&V> {
        self.entries.get(key)
    }

    /// Removes and returns the value under `key`. Absent keys are a no-op.
    #[inline]
    pub fn remove(&mut self, key: &SessionKey) -> Option<V> {
        self.entries.remove(key)
    }

    /// Returns `true` if `key` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of registered entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry, returning them.
    pub fn drain(&mut self) -> impl Iterator<Item = (SessionKey, V)> + '_ {
        self.entries.drain()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Thread-safe registry of live sessions keyed by random [`SessionKey`]s.
///
/// Writers are serialized; lookups may run concurrently with each other.
/// Values are cheap handles, so [`Registry::get`] returns a clone rather
/// than holding the lock for the caller.
///
/// # Example
///
/// ```
/// use spider_tunnel::Registry;
///
/// # fn main() -> spider_tunnel::Result<()> {
/// let registry = Registry::new(8);
/// let key = registry.register("host")?;
///
/// assert_eq!(registry.get(&key), Some("host"));
/// registry.unregister(&key);
/// registry.unregister(&key);
/// assert!(!registry.has(&key));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Registry<V> {
    table: RwLock<KeyTable<V>>,
}

impl<V: Clone> Registry<V> {
    /// Creates an empty registry issuing random keys of `key_length` bytes.
    #[must_use]
    pub fn new(key_length: usize) -> Self {
        Self {
            table: RwLock::new(KeyTable::random(key_length)),
        }
    }

    /// Returns the length of issued keys.
    #[inline]
    #[must_use]
    pub fn key_length(&self) -> usize {
        self.table.read().key_length()
    }

    /// Registers `value` under a fresh random key.
    ///
    /// Collisions are retried while the write lock is held, so the returned
    /// key is unique among live entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryFull`] only if every retry collides.
    pub fn register(&self, value: V) -> Result<SessionKey> {
        self.table.write().insert(value)
    }

    /// Returns a clone of the value registered under `key`.
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<V> {
        self.table.read().get(key).cloned()
    }

    /// Removes `key`. Unknown keys are ignored.
    pub fn unregister(&self, key: &SessionKey) {
        self.table.write().remove(key);
    }

    /// Returns `true` if `key` is registered.
    #[must_use]
    pub fn has(&self, key: &SessionKey) -> bool {
        self.table.read().contains(key)
    }

    /// Returns the number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use proptest::prelude::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_get_unknown_key() {
        let registry: Registry<u32> = Registry::new(8);
        let key = SessionKey::from_bytes(vec![0; 8]);
        assert_eq!(registry.get(&key), None);
        assert!(!registry.has(&key));
    }

    #[test]
    fn test_register_get_unregister() {
        let registry = Registry::new(8);
        let key = registry.register(42u32).expect("registered");

        assert_eq!(key.len(), 8);
        assert_eq!(registry.get(&key), Some(42));
        assert_eq!(registry.len(), 1);

        registry.unregister(&key);
        assert_eq!(registry.get(&key), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new(8);
        let kept = registry.register("kept").expect("registered");
        let removed = registry.register("removed").expect("registered");

        registry.unregister(&removed);
        registry.unregister(&removed);
        registry.unregister(&SessionKey::from_bytes(vec![9; 8]));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&kept), Some("kept"));
    }

    #[test]
    fn test_one_byte_random_keys_stay_unique() {
        let registry = Registry::new(1);
        let keys: FxHashSet<SessionKey> = (0..200)
            .map(|i| registry.register(i).expect("registered"))
            .collect();
        assert_eq!(keys.len(), 200);
    }

    #[test]
    fn test_full_one_byte_random_registry() {
        let registry = Registry::new(1);
        for i in 0..256 {
            registry.register(i).expect("registered");
        }
        assert_eq!(registry.len(), 256);

        // Every one-byte key is live, so the next draw can only collide.
        registry.unregister(&SessionKey::from(7u8));
        let key = registry.register(999).expect("freed key");
        assert_eq!(key.as_bytes(), &[7]);
        assert_eq!(registry.get(&key), Some(999));
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(Registry::new(2));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| registry.register(t * 100 + i).expect("registered"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut keys = FxHashSet::default();
        for handle in handles {
            for key in handle.join().expect("thread panicked") {
                assert!(keys.insert(key), "duplicate key issued");
            }
        }
        assert_eq!(registry.len(), 800);
    }

    #[test]
    fn test_sequential_table_fills_and_reuses() {
        let mut table = KeyTable::sequential();

        let first = table.insert("a").expect("free id");
        assert_eq!(first.as_bytes(), &[1]);

        for _ in 1..255 {
            table.insert("x").expect("free id");
        }
        assert_eq!(table.len(), 255);
        assert!(matches!(
            table.insert("overflow"),
            Err(Error::RegistryFull { capacity: 255 })
        ));

        table.remove(&SessionKey::from(17u8));
        let reused = table.insert("again").expect("freed id");
        assert_eq!(reused.as_bytes(), &[17]);
    }

    #[test]
    fn test_sequential_table_skips_live_ids() {
        let mut table = KeyTable::sequential();
        let one = table.insert(1).expect("free id");
        let two = table.insert(2).expect("free id");
        table.remove(&one);

        // The cursor keeps moving forward instead of reissuing 1 right away.
        let three = table.insert(3).expect("free id");
        assert_eq!(two.as_bytes(), &[2]);
        assert_eq!(three.as_bytes(), &[3]);
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = KeyTable::sequential();
        table.insert('a').expect("free id");
        table.insert('b').expect("free id");

        let drained: Vec<_> = table.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn prop_registered_keys_are_distinct(count in 1usize..300) {
            let registry = Registry::new(4);
            let keys: FxHashSet<SessionKey> =
                (0..count).map(|i| registry.register(i).expect("registered")).collect();
            prop_assert_eq!(keys.len(), count);
            for key in &keys {
                prop_assert!(registry.has(key));
            }
        }
    }
}
