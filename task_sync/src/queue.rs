use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::wait::{Resume, Ticket, WaitQueue};
use crate::Cancelled;

/// An unbounded FIFO container for cooperative tasks.
///
/// The FIFO twin of [`Stack`]: [`enqueue`] never suspends, [`dequeue`]
/// suspends while the queue is empty. Waiting consumers are served in arrival
/// order and a value enqueued while consumers wait goes to the oldest one
/// directly, bypassing storage.
///
/// [`Stack`]: crate::Stack
/// [`enqueue`]: Self::enqueue
/// [`dequeue`]: Self::dequeue
#[derive(Debug)]
pub struct Queue<T> {
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    storage: VecDeque<T>,
    takers: WaitQueue<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                storage: VecDeque::new(),
                takers: WaitQueue::new(),
            }),
        }
    }

    /// The number of stored values. Waiting consumers do not count.
    pub fn len(&self) -> usize {
        self.inner.lock().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the head value without removing it.
    pub fn try_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().storage.front().cloned()
    }

    /// Removes and returns the head value. Never suspends.
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().storage.pop_front()
    }

    /// Removes and returns the head value, suspending until one is available.
    pub fn dequeue(&self) -> Dequeue<'_, T> {
        self.dequeue_inner(None)
    }

    /// Like [`dequeue`], but the wait is abandoned when `cancel` fires. A
    /// token that is already cancelled resolves the future without touching
    /// the queue.
    ///
    /// [`dequeue`]: Self::dequeue
    pub fn dequeue_with_cancel(&self, cancel: &CancellationToken) -> Dequeue<'_, T> {
        self.dequeue_inner(Some(cancel))
    }

    fn dequeue_inner(&self, cancel: Option<&CancellationToken>) -> Dequeue<'_, T> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Dequeue {
                queue: self,
                state: DequeueState::Ready(Some(Err(Cancelled))),
            };
        }

        let mut inner = self.inner.lock();
        if let Some(value) = inner.storage.pop_front() {
            return Dequeue {
                queue: self,
                state: DequeueState::Ready(Some(Ok(value))),
            };
        }

        let ticket = inner.takers.enqueue(cancel);
        Dequeue {
            queue: self,
            state: DequeueState::Waiting(ticket),
        }
    }

    /// Appends a value, handing it to the oldest waiting consumer if one
    /// exists.
    pub fn enqueue(&self, value: T) {
        let mut resume = Resume::new();
        let mut inner = self.inner.lock();

        if let Some(value) = inner.takers.resolve_next(value, &mut resume) {
            // No live waiter: a value only enters storage while none waits.
            debug_assert!(inner.takers.is_empty());
            inner.storage.push_back(value);
        }

        drop(inner);
    }

    /// Resolves every waiting consumer with a copy of `value`. Consumers
    /// arriving afterwards are unaffected.
    pub fn complete_all_dequeue(&self, value: T) -> Resume<T>
    where
        T: Clone,
    {
        let mut resume = Resume::new();
        self.inner.lock().takers.resolve_all(value, &mut resume);
        tracing::trace!(resumed = resume.len(), "completing all pending dequeues");
        resume
    }

    /// Resolves every waiting consumer as cancelled.
    pub fn cancel_all_dequeue(&self) -> Resume<T> {
        let mut resume = Resume::new();
        self.inner.lock().takers.cancel_all(&mut resume);
        tracing::trace!(resumed = resume.len(), "cancelling all pending dequeues");
        resume
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Queue::dequeue`].
pub struct Dequeue<'a, T> {
    queue: &'a Queue<T>,
    state: DequeueState<T>,
}

enum DequeueState<T> {
    Ready(Option<Result<T, Cancelled>>),
    Waiting(Ticket<T>),
}

impl<T> Future for Dequeue<'_, T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `Dequeue` never relies on pinning guarantees; none of its
        // fields are address-sensitive, so it is safe to treat as unpinned.
        let this = unsafe { self.get_unchecked_mut() };
        let queue = this.queue;

        match &mut this.state {
            DequeueState::Ready(result) => {
                Poll::Ready(result.take().expect("future polled after completion"))
            }
            DequeueState::Waiting(ticket) => {
                ticket.poll(cx, |key| queue.inner.lock().takers.remove(key))
            }
        }
    }
}

impl<T> Drop for Dequeue<'_, T> {
    fn drop(&mut self) {
        if let DequeueState::Waiting(ticket) = &self.state {
            if !ticket.is_done() {
                self.queue.inner.lock().takers.remove(ticket.key());
            }
        }
    }
}
