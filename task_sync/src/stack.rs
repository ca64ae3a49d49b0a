use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::wait::{Resume, Ticket, WaitQueue};
use crate::Cancelled;

/// An unbounded LIFO container for cooperative tasks.
///
/// [`push`] never suspends. [`pop`] returns the most recently pushed value
/// when one is stored and otherwise suspends until a producer arrives. While
/// any consumer is waiting the storage is empty: a pushed value is handed to
/// the oldest waiter directly and never touches storage.
///
/// [`push`]: Self::push
/// [`pop`]: Self::pop
#[derive(Debug)]
pub struct Stack<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Inner<T> {
    storage: Vec<T>,
    takers: WaitQueue<T>,
}

impl<T> Stack<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                storage: Vec::new(),
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

    /// Returns a copy of the top value without removing it.
    pub fn try_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().storage.last().cloned()
    }

    /// Removes and returns the top value. Never suspends.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().storage.pop()
    }

    /// Removes and returns the top value, suspending until one is available.
    ///
    /// Waiting consumers are served in the order they called `pop`,
    /// independent of the LIFO ordering of stored values. Dropping the
    /// returned future before completion gives up the wait.
    pub fn pop(&self) -> Pop<'_, T> {
        self.pop_inner(None)
    }

    /// Like [`pop`], but the wait is abandoned when `cancel` fires. A token
    /// that is already cancelled resolves the future without touching the
    /// stack.
    ///
    /// [`pop`]: Self::pop
    pub fn pop_with_cancel(&self, cancel: &CancellationToken) -> Pop<'_, T> {
        self.pop_inner(Some(cancel))
    }

    fn pop_inner(&self, cancel: Option<&CancellationToken>) -> Pop<'_, T> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Pop {
                stack: self,
                state: PopState::Ready(Some(Err(Cancelled))),
            };
        }

        let mut inner = self.inner.lock();
        if let Some(value) = inner.storage.pop() {
            return Pop {
                stack: self,
                state: PopState::Ready(Some(Ok(value))),
            };
        }

        let ticket = inner.takers.enqueue(cancel);
        Pop {
            stack: self,
            state: PopState::Waiting(ticket),
        }
    }

    /// Pushes a value, handing it to the oldest waiting consumer if one
    /// exists.
    pub fn push(&self, value: T) {
        let mut resume = Resume::new();
        let mut inner = self.inner.lock();

        if let Some(value) = inner.takers.resolve_next(value, &mut resume) {
            // No live waiter: a value only enters storage while none waits.
            debug_assert!(inner.takers.is_empty());
            inner.storage.push(value);
        }

        drop(inner);
        // `resume` drops here, waking the matched consumer outside the lock.
    }

    /// Resolves every waiting consumer with a copy of `value`.
    ///
    /// Consumers arriving afterwards are unaffected. The returned batch wakes
    /// the consumers when dropped.
    pub fn complete_all_pop(&self, value: T) -> Resume<T>
    where
        T: Clone,
    {
        let mut resume = Resume::new();
        self.inner.lock().takers.resolve_all(value, &mut resume);
        tracing::trace!(resumed = resume.len(), "completing all pending pops");
        resume
    }

    /// Resolves every waiting consumer as cancelled.
    pub fn cancel_all_pop(&self) -> Resume<T> {
        let mut resume = Resume::new();
        self.inner.lock().takers.cancel_all(&mut resume);
        tracing::trace!(resumed = resume.len(), "cancelling all pending pops");
        resume
    }
}

/// Future returned by [`Stack::pop`].
pub struct Pop<'a, T> {
    stack: &'a Stack<T>,
    state: PopState<T>,
}

enum PopState<T> {
    Ready(Option<Result<T, Cancelled>>),
    Waiting(Ticket<T>),
}

impl<T> Future for Pop<'_, T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `Pop` never relies on pinning guarantees; none of its
        // fields are address-sensitive, so it is safe to treat as unpinned.
        let this = unsafe { self.get_unchecked_mut() };
        let stack = this.stack;

        match &mut this.state {
            PopState::Ready(result) => {
                Poll::Ready(result.take().expect("future polled after completion"))
            }
            PopState::Waiting(ticket) => {
                ticket.poll(cx, |key| stack.inner.lock().takers.remove(key))
            }
        }
    }
}

impl<T> Drop for Pop<'_, T> {
    fn drop(&mut self) {
        if let PopState::Waiting(ticket) = &self.state {
            if !ticket.is_done() {
                self.stack.inner.lock().takers.remove(ticket.key());
            }
        }
    }
}
