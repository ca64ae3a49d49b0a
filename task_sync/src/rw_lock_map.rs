use std::hash::{BuildHasher, Hash, RandomState};
use std::sync::Arc;

use async_lock::{
    RwLock as AsyncRwLock, RwLockReadGuardArc, RwLockUpgradableReadGuardArc, RwLockWriteGuardArc,
};
use futures_lite::future::{block_on, or};
use tokio_util::sync::CancellationToken;

use crate::registry::{EntryRef, Registry};
use crate::Cancelled;

/// Reader/writer locking per key.
///
/// The keyed sibling of [`LockMap`]: any number of readers or a single
/// writer per key, plus upgradeable readers which coexist with plain readers
/// and can later upgrade to writing without releasing the key. Entries are
/// created and removed on demand exactly like [`LockMap`] entries, and the
/// same non-recursiveness caveat applies.
///
/// [`LockMap`]: crate::LockMap
#[derive(Debug)]
pub struct RwLockMap<K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    registry: Registry<K, AsyncRwLock<()>, S>,
}

impl<K> RwLockMap<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, S> RwLockMap<K, S>
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

    /// Acquires shared access to `key`, suspending while a writer holds it.
    pub async fn read_async(&self, key: K) -> RwLockMapReadGuard<'_, K, S> {
        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);
        let guard = lock.read_arc().await;

        RwLockMapReadGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Like [`read_async`], but gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired; the entry reference taken for the attempt is given back.
    ///
    /// [`read_async`]: Self::read_async
    pub async fn read_async_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapReadGuard<'_, K, S>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);

        let guard = or(async { Some(lock.read_arc().await) }, async {
            cancel.cancelled().await;
            None
        })
        .await;

        match guard {
            Some(guard) => Ok(RwLockMapReadGuard {
                _guard: guard,
                _entry: entry,
            }),
            None => Err(Cancelled),
        }
    }

    /// Acquires exclusive access to `key`, suspending while any other holder
    /// exists.
    pub async fn write_async(&self, key: K) -> RwLockMapWriteGuard<'_, K, S> {
        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);
        let guard = lock.write_arc().await;

        RwLockMapWriteGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Like [`write_async`], but gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired; the entry reference taken for the attempt is given back.
    ///
    /// [`write_async`]: Self::write_async
    pub async fn write_async_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapWriteGuard<'_, K, S>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);

        let guard = or(async { Some(lock.write_arc().await) }, async {
            cancel.cancelled().await;
            None
        })
        .await;

        match guard {
            Some(guard) => Ok(RwLockMapWriteGuard {
                _guard: guard,
                _entry: entry,
            }),
            None => Err(Cancelled),
        }
    }

    /// Acquires shared access to `key` with the right to upgrade to
    /// exclusive access later. At most one upgradeable reader per key exists
    /// at a time; it coexists with plain readers.
    pub async fn upgradable_read_async(&self, key: K) -> RwLockMapUpgradableGuard<'_, K, S> {
        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);
        let guard = lock.upgradable_read_arc().await;

        RwLockMapUpgradableGuard {
            lock,
            guard: Some(guard),
            _entry: entry,
        }
    }

    /// Like [`upgradable_read_async`], but gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired; the entry reference taken for the attempt is given back.
    ///
    /// [`upgradable_read_async`]: Self::upgradable_read_async
    pub async fn upgradable_read_async_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapUpgradableGuard<'_, K, S>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let lock = self.registry.checkout(&key);
        let entry = EntryRef::new(&self.registry, key);

        let guard = or(async { Some(lock.upgradable_read_arc().await) }, async {
            cancel.cancelled().await;
            None
        })
        .await;

        match guard {
            Some(guard) => Ok(RwLockMapUpgradableGuard {
                lock,
                guard: Some(guard),
                _entry: entry,
            }),
            None => Err(Cancelled),
        }
    }

    /// Blocking variant of [`read_async`].
    ///
    /// [`read_async`]: Self::read_async
    pub fn read(&self, key: K) -> RwLockMapReadGuard<'_, K, S> {
        block_on(self.read_async(key))
    }

    /// Blocking variant of [`read_async_with_cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired.
    ///
    /// [`read_async_with_cancel`]: Self::read_async_with_cancel
    pub fn read_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapReadGuard<'_, K, S>, Cancelled> {
        block_on(self.read_async_with_cancel(key, cancel))
    }

    /// Blocking variant of [`write_async`].
    ///
    /// [`write_async`]: Self::write_async
    pub fn write(&self, key: K) -> RwLockMapWriteGuard<'_, K, S> {
        block_on(self.write_async(key))
    }

    /// Blocking variant of [`write_async_with_cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired.
    ///
    /// [`write_async_with_cancel`]: Self::write_async_with_cancel
    pub fn write_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapWriteGuard<'_, K, S>, Cancelled> {
        block_on(self.write_async_with_cancel(key, cancel))
    }

    /// Blocking variant of [`upgradable_read_async`].
    ///
    /// [`upgradable_read_async`]: Self::upgradable_read_async
    pub fn upgradable_read(&self, key: K) -> RwLockMapUpgradableGuard<'_, K, S> {
        block_on(self.upgradable_read_async(key))
    }

    /// Blocking variant of [`upgradable_read_async_with_cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the lock was
    /// acquired.
    ///
    /// [`upgradable_read_async_with_cancel`]: Self::upgradable_read_async_with_cancel
    pub fn upgradable_read_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapUpgradableGuard<'_, K, S>, Cancelled> {
        block_on(self.upgradable_read_async_with_cancel(key, cancel))
    }
}

impl<K> Default for RwLockMap<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Holds shared access to a [`RwLockMap`] key.
#[derive(Debug)]
pub struct RwLockMapReadGuard<'a, K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    _guard: RwLockReadGuardArc<()>,
    _entry: EntryRef<'a, K, AsyncRwLock<()>, S>,
}

/// Holds exclusive access to a [`RwLockMap`] key.
#[derive(Debug)]
pub struct RwLockMapWriteGuard<'a, K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    _guard: RwLockWriteGuardArc<()>,
    _entry: EntryRef<'a, K, AsyncRwLock<()>, S>,
}

/// Holds upgradeable shared access to a [`RwLockMap`] key.
///
/// The guard references its registry entry exactly once, regardless of how
/// many upgrade/downgrade cycles it goes through; the entry is given back
/// when this guard drops.
#[derive(Debug)]
pub struct RwLockMapUpgradableGuard<'a, K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    lock: Arc<AsyncRwLock<()>>,
    // `None` while an upgrade is outstanding.
    guard: Option<RwLockUpgradableReadGuardArc<()>>,
    _entry: EntryRef<'a, K, AsyncRwLock<()>, S>,
}

impl<'a, K, S> RwLockMapUpgradableGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// `true` while an upgrade obtained from this guard is outstanding.
    pub fn is_upgraded(&self) -> bool {
        self.guard.is_none()
    }

    /// Upgrades to exclusive access, suspending until the remaining readers
    /// leave. Dropping the returned guard downgrades back to upgradeable
    /// shared access.
    pub async fn upgrade_async(&mut self) -> RwLockMapUpgradedGuard<'_, 'a, K, S> {
        let guard = self.guard.take().expect("upgradeable state lost");
        let write = RwLockUpgradableReadGuardArc::upgrade(guard).await;

        RwLockMapUpgradedGuard {
            owner: self,
            write: Some(write),
        }
    }

    /// Like [`upgrade_async`], but gives up when `cancel` fires. On
    /// cancellation the guard re-establishes its upgradeable claim before
    /// returning, so other writers may briefly win the lock in between.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the upgrade
    /// completed; the guard still holds upgradeable shared access.
    ///
    /// [`upgrade_async`]: Self::upgrade_async
    pub async fn upgrade_async_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapUpgradedGuard<'_, 'a, K, S>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let guard = self.guard.take().expect("upgradeable state lost");

        let write = or(
            async { Some(RwLockUpgradableReadGuardArc::upgrade(guard).await) },
            async {
                cancel.cancelled().await;
                None
            },
        )
        .await;

        match write {
            Some(write) => Ok(RwLockMapUpgradedGuard {
                owner: self,
                write: Some(write),
            }),
            None => {
                // The abandoned upgrade released the claim; take it again.
                self.guard = Some(self.lock.upgradable_read_arc().await);
                Err(Cancelled)
            }
        }
    }

    /// Blocking variant of [`upgrade_async`].
    ///
    /// [`upgrade_async`]: Self::upgrade_async
    pub fn upgrade(&mut self) -> RwLockMapUpgradedGuard<'_, 'a, K, S> {
        block_on(self.upgrade_async())
    }

    /// Blocking variant of [`upgrade_async_with_cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token fired before the upgrade
    /// completed.
    ///
    /// [`upgrade_async_with_cancel`]: Self::upgrade_async_with_cancel
    pub fn upgrade_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RwLockMapUpgradedGuard<'_, 'a, K, S>, Cancelled> {
        block_on(self.upgrade_async_with_cancel(cancel))
    }
}

/// Holds the exclusive access obtained by upgrading a
/// [`RwLockMapUpgradableGuard`]. Dropping it downgrades back to the
/// upgradeable state; the registry entry stays with the outer guard.
#[derive(Debug)]
pub struct RwLockMapUpgradedGuard<'g, 'a, K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    owner: &'g mut RwLockMapUpgradableGuard<'a, K, S>,
    write: Option<RwLockWriteGuardArc<()>>,
}

impl<K, S> Drop for RwLockMapUpgradedGuard<'_, '_, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if let Some(write) = self.write.take() {
            self.owner.guard = Some(RwLockWriteGuardArc::downgrade_to_upgradable(write));
        }
    }
}
