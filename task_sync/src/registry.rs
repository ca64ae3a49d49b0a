use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, RandomState};
use std::sync::Arc;

use parking_lot::Mutex;

/// A reference-counted table of per-key lock primitives.
///
/// An entry exists exactly while at least one acquisition references it: it
/// is created on the first checkout of a key and removed when the matching
/// release drops the count to zero. The table mutex guards lookups, inserts,
/// removals and the counts; it is never held across a suspension on the
/// per-key primitive.
#[derive(Debug)]
pub(crate) struct Registry<K, L, S = RandomState> {
    slots: Mutex<HashMap<K, Slot<L>, S>>,
    hasher: S,
}

#[derive(Debug)]
struct Slot<L> {
    lock: Arc<L>,
    refs: usize,
}

impl<K, L, S> Registry<K, L, S>
where
    K: Eq + Hash + Clone,
    L: Default,
    S: BuildHasher + Clone,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            slots: Mutex::new(HashMap::with_hasher(hasher.clone())),
            hasher,
        }
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns the primitive for `key`, creating the entry on first use and
    /// counting the reference otherwise.
    pub fn checkout(&self, key: &K) -> Arc<L> {
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot) => {
                slot.refs += 1;
                slot.lock.clone()
            }
            None => {
                let lock = Arc::new(L::default());
                slots.insert(
                    key.clone(),
                    Slot {
                        lock: lock.clone(),
                        refs: 1,
                    },
                );
                lock
            }
        }
    }

    /// Drops one reference to the entry for `key`, removing it at zero. The
    /// primitive stays alive for holders that still own the `Arc`, but is
    /// never handed out again.
    pub fn release(&self, key: &K) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key).expect("released key with no entry");

        slot.refs -= 1;
        if slot.refs == 0 {
            slots.remove(key);
            tracing::trace!("removed keyed lock entry after last release");
        }
    }

    /// The number of keys with outstanding references.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// One counted reference to a registry entry.
///
/// Armed immediately after [`Registry::checkout`] and released on drop, so a
/// cancelled or panicking acquisition gives the reference back on unwind. On
/// a successful acquisition it moves into the returned guard and is released
/// when the guard drops.
#[derive(Debug)]
pub(crate) struct EntryRef<'a, K, L, S = RandomState>
where
    K: Eq + Hash + Clone,
    L: Default,
    S: BuildHasher + Clone,
{
    registry: &'a Registry<K, L, S>,
    key: K,
}

impl<'a, K, L, S> EntryRef<'a, K, L, S>
where
    K: Eq + Hash + Clone,
    L: Default,
    S: BuildHasher + Clone,
{
    pub fn new(registry: &'a Registry<K, L, S>, key: K) -> Self {
        Self { registry, key }
    }
}

impl<K, L, S> Drop for EntryRef<'_, K, L, S>
where
    K: Eq + Hash + Clone,
    L: Default,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
