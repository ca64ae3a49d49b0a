//! Coordination primitives for cooperative tasks.
//!
//! Two families live here. The containers — [`Stack`], [`Queue`] and
//! [`BoundedQueue`] — move values between producers and consumers that
//! suspend instead of blocking a thread: a consumer of an empty container
//! (or a producer of a full bounded one) joins a FIFO wait queue and is
//! resumed by its counterpart. The keyed maps — [`LockMap`] and
//! [`RwLockMap`] — provide mutual exclusion and reader/writer locking per
//! key, creating and removing the per-key lock objects on demand.
//!
//! Every suspending operation has a `_with_cancel` variant taking a
//! [`CancellationToken`]; a fired token resolves the wait with [`Cancelled`].
//! Dropping a suspended future gives up the wait as well.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod bounded;
pub mod lock_map;
pub mod queue;
pub mod rw_lock_map;
pub mod stack;

mod registry;
mod wait;

pub use bounded::BoundedQueue;
pub use lock_map::LockMap;
pub use queue::Queue;
pub use rw_lock_map::RwLockMap;
pub use stack::Stack;
pub use wait::Resume;

use thiserror::Error;

/// A suspending operation was abandoned because its cancellation signal
/// fired, or because the waiters were cancelled collectively.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;
