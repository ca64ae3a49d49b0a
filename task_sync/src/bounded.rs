use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::wait::{PutQueue, Resume, Ticket, WaitQueue};
use crate::Cancelled;

/// A FIFO container with a fixed capacity and backpressure on both sides.
///
/// Consumers suspend while the queue is empty; producers suspend while it is
/// full. A capacity of zero makes every transfer a rendezvous: values move
/// from a producer to a consumer directly and the storage stays empty.
///
/// Values become observable in the FIFO order of the enqueue calls,
/// regardless of whether the producer took the fast path or had to wait: a
/// dequeue that frees a slot pulls the oldest waiting producer's value to the
/// tail of storage before returning.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    storage: VecDeque<T>,
    takers: WaitQueue<T>,
    putters: PutQueue<T>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                storage: VecDeque::new(),
                takers: WaitQueue::new(),
                putters: PutQueue::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of stored values. Waiting producers and consumers do not
    /// count.
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
    ///
    /// Freeing a slot pulls the oldest waiting producer's value into storage;
    /// with a capacity of zero the value is taken from that producer
    /// directly.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut resume = Resume::new();
        let mut inner = self.inner.lock();
        let value = inner.dequeue_value(self.capacity, &mut resume);
        drop(inner);
        value
    }

    /// Removes and returns the head value, suspending until one is
    /// observable.
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

        let mut resume = Resume::new();
        let mut inner = self.inner.lock();

        let state = match inner.dequeue_value(self.capacity, &mut resume) {
            Some(value) => DequeueState::Ready(Some(Ok(value))),
            None => {
                // A consumer only waits while no producer does.
                debug_assert!(inner.putters.is_empty());
                DequeueState::Waiting(inner.takers.enqueue(cancel))
            }
        };

        drop(inner);
        Dequeue { queue: self, state }
    }

    /// Appends a value if the queue is not full, handing it to the oldest
    /// waiting consumer if one exists. Never suspends.
    ///
    /// # Errors
    ///
    /// Returns the value back when the queue is full.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mut resume = Resume::new();
        let mut inner = self.inner.lock();

        let result = match inner.takers.resolve_next(value, &mut resume) {
            None => Ok(()),
            Some(value) if inner.storage.len() < self.capacity => {
                inner.storage.push_back(value);
                Ok(())
            }
            Some(value) => Err(value),
        };

        drop(inner);
        result
    }

    /// Appends a value, suspending until a slot is free.
    ///
    /// While a consumer is waiting the value is handed to the oldest one
    /// directly.
    pub fn enqueue(&self, value: T) -> Enqueue<'_, T> {
        self.enqueue_inner(value, None)
    }

    /// Like [`enqueue`], but the wait is abandoned when `cancel` fires,
    /// dropping the pending value. A token that is already cancelled resolves
    /// the future without touching the queue.
    ///
    /// [`enqueue`]: Self::enqueue
    pub fn enqueue_with_cancel(&self, value: T, cancel: &CancellationToken) -> Enqueue<'_, T> {
        self.enqueue_inner(value, Some(cancel))
    }

    fn enqueue_inner(&self, value: T, cancel: Option<&CancellationToken>) -> Enqueue<'_, T> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Enqueue {
                queue: self,
                state: EnqueueState::Ready(Some(Err(Cancelled))),
            };
        }

        let mut resume = Resume::new();
        let mut inner = self.inner.lock();

        let state = match inner.takers.resolve_next(value, &mut resume) {
            None => EnqueueState::Ready(Some(Ok(()))),
            Some(value) if inner.storage.len() < self.capacity => {
                inner.storage.push_back(value);
                EnqueueState::Ready(Some(Ok(())))
            }
            Some(value) => {
                // A producer only waits while no consumer does.
                debug_assert!(inner.takers.is_empty());
                EnqueueState::Waiting(inner.putters.enqueue(value, cancel))
            }
        };

        drop(inner);
        Enqueue { queue: self, state }
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

    /// Completes every waiting producer, moving all pending values to the
    /// tail of storage. The capacity may be exceeded afterwards; subsequent
    /// producers keep suspending until the excess is drained.
    pub fn complete_all_enqueue(&self) -> Resume<()> {
        let mut resume = Resume::new();
        let mut inner = self.inner.lock();

        while let Some(value) = inner.putters.resolve_next(&mut resume) {
            inner.storage.push_back(value);
        }

        drop(inner);
        tracing::trace!(resumed = resume.len(), "completing all pending enqueues");
        resume
    }

    /// Resolves every waiting producer as cancelled, dropping the pending
    /// values.
    pub fn cancel_all_enqueue(&self) -> Resume<()> {
        let mut resume = Resume::new();
        self.inner.lock().putters.cancel_all(&mut resume);
        tracing::trace!(resumed = resume.len(), "cancelling all pending enqueues");
        resume
    }
}

impl<T> Inner<T> {
    /// The dequeue fast path: take the head value, then backfill the freed
    /// slot from the oldest waiting producer. With an empty storage the value
    /// comes from a waiting producer directly (the zero-capacity rendezvous).
    fn dequeue_value(&mut self, capacity: usize, resume: &mut Resume<()>) -> Option<T> {
        match self.storage.pop_front() {
            Some(value) => {
                if self.storage.len() < capacity {
                    if let Some(pending) = self.putters.resolve_next(resume) {
                        self.storage.push_back(pending);
                    }
                }
                Some(value)
            }
            None => self.putters.resolve_next(resume),
        }
    }
}

/// Future returned by [`BoundedQueue::dequeue`].
pub struct Dequeue<'a, T> {
    queue: &'a BoundedQueue<T>,
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

/// Future returned by [`BoundedQueue::enqueue`].
pub struct Enqueue<'a, T> {
    queue: &'a BoundedQueue<T>,
    state: EnqueueState,
}

enum EnqueueState {
    Ready(Option<Result<(), Cancelled>>),
    Waiting(Ticket<()>),
}

impl<T> Future for Enqueue<'_, T> {
    type Output = Result<(), Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let queue = this.queue;

        match &mut this.state {
            EnqueueState::Ready(result) => {
                Poll::Ready(result.take().expect("future polled after completion"))
            }
            EnqueueState::Waiting(ticket) => {
                ticket.poll(cx, |key| queue.inner.lock().putters.remove(key))
            }
        }
    }
}

impl<T> Drop for Enqueue<'_, T> {
    fn drop(&mut self) {
        if let EnqueueState::Waiting(ticket) = &self.state {
            if !ticket.is_done() {
                self.queue.inner.lock().putters.remove(ticket.key());
            }
        }
    }
}
