use std::hash::{BuildHasher, Hash, RandomState};

use async_lock::{Mutex as AsyncMutex, MutexGuardArc};
use futures_lite::future::{block_on, or};
use tokio_util::sync::CancellationToken;

use crate::registry::{EntryRef, Registry};
use crate::Cancelled;

/// Mutual exclusion per key.
///
/// A lock object exists only while a key is held or waited for: the first
/// acquisition for a key creates it and the last released guard removes it.
/// Acquisitions for distinct keys never contend on anything but the short
/// map lookup.
///
/// The lock is not recursive. A task that acquires a key it already holds
/// deadlocks; this is not detected.
///
/// Keys are distinguished by `Eq`/`Hash` under the map's [`BuildHasher`],
/// which can be supplied with [`with_hasher`].
///
/// [`with_hasher`]: Self::with_hasher
#[derive(Debug)]
pub struct LockMap<K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    registry: Registry<K, AsyncMutex<()>, S>,
}

impl<K> LockMap<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, S> LockMap<K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            registry: Registry::with_hasher(hasher),
        }
    }

    pub fn hasher(&self) -> &S {
        self.registry.hasher()
    }

    /// The number of keys currently held or waited for.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires the lock for `key`, suspending while another holder exists.
    pub async fn lock_async(&self, key: K) -> LockMapGuard<'_, K, S> {
        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);
        let guard = lock.lock_arc().await;

        LockMapGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Like [`lock_async`], but gives up when `cancel` fires. A token that is
    /// already cancelled fails without creating an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired; the entry reference taken for the attempt is given back.
    ///
    /// [`lock_async`]: Self::lock_async
    pub async fn lock_async_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<LockMapGuard<'_, K, S>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);

        let guard = or(async { Some(lock.lock_arc().await) }, async {
            cancel.cancelled().await;
            None
        })
        .await;

        match guard {
            Some(guard) => Ok(LockMapGuard {
                _guard: guard,
                _entry: entry,
            }),
            // `entry` drops here, giving the reference back.
            None => Err(Cancelled),
        }
    }

    /// Blocking variant of [`lock_async`].
    ///
    /// [`lock_async`]: Self::lock_async
    pub fn lock(&self, key: K) -> LockMapGuard<'_, K, S> {
        block_on(self.lock_async(key))
    }

    /// Blocking variant of [`lock_async_with_cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired.
    ///
    /// [`lock_async_with_cancel`]: Self::lock_async_with_cancel
    pub fn lock_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<LockMapGuard<'_, K, S>, Cancelled> {
        block_on(self.lock_async_with_cancel(key, cancel))
    }
}

impl<K> Default for LockMap<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a [`LockMap`] key exclusively.
///
/// Dropping the guard releases the per-key lock and then gives the entry
/// reference back, removing the entry when it was the last one.
#[derive(Debug)]
pub struct LockMapGuard<'a, K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    // Field order: the per-key lock is released before the entry reference.
    _guard: MutexGuardArc<()>,
    _entry: EntryRef<'a, K, AsyncMutex<()>, S>,
}
