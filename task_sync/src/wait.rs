//! FIFO registries of suspended callers and the deferred wakeup protocol
//! shared by all containers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::Cancelled;

/// A FIFO of suspended takers.
///
/// Every entry owns the sending half of a single-shot channel; the waiting
/// future owns the receiving half. An entry whose cancellation token has fired
/// or whose future has been dropped is dead: it never matches a value and is
/// swept out whenever the queue is walked. All operations must be called with
/// the container mutex held.
#[derive(Debug)]
pub(crate) struct WaitQueue<T> {
    entries: VecDeque<Entry<T>>,
    next_key: u64,
}

#[derive(Debug)]
struct Entry<T> {
    key: u64,
    cancel: Option<CancellationToken>,
    tx: oneshot::Sender<Result<T, Cancelled>>,
}

impl<T> Entry<T> {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| cancel.is_cancelled())
    }

    fn is_live(&self) -> bool {
        !self.tx.is_closed() && !self.is_cancelled()
    }
}

impl<T> WaitQueue<T> {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_key: 0,
        }
    }

    /// Appends a new waiter and returns its future half.
    pub fn enqueue(&mut self, cancel: Option<&CancellationToken>) -> Ticket<T> {
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        self.entries.push_back(Entry {
            key,
            cancel: cancel.cloned(),
            tx,
        });

        Ticket {
            key,
            rx,
            cancel: cancel.map(|cancel| Box::pin(cancel.clone().cancelled_owned())),
            done: false,
        }
    }

    /// Hands `value` to the oldest live waiter. Returns the value back if no
    /// live waiter exists. Dead entries in front of the match are swept.
    pub fn resolve_next(&mut self, value: T, resume: &mut Resume<T>) -> Option<T> {
        while let Some(entry) = self.entries.pop_front() {
            if entry.tx.is_closed() {
                continue;
            }

            if entry.is_cancelled() {
                resume.push(entry.tx, Err(Cancelled));
                continue;
            }

            resume.push(entry.tx, Ok(value));
            return None;
        }

        Some(value)
    }

    /// Resolves every waiter present with a clone of `value`. Entries whose
    /// token already fired resolve as cancelled instead.
    pub fn resolve_all(&mut self, value: T, resume: &mut Resume<T>)
    where
        T: Clone,
    {
        for entry in self.entries.drain(..) {
            if entry.tx.is_closed() {
                continue;
            }

            if entry.is_cancelled() {
                resume.push(entry.tx, Err(Cancelled));
            } else {
                resume.push(entry.tx, Ok(value.clone()));
            }
        }
    }

    /// Resolves every waiter present as cancelled.
    pub fn cancel_all(&mut self, resume: &mut Resume<T>) {
        for entry in self.entries.drain(..) {
            if entry.tx.is_closed() {
                continue;
            }

            resume.push(entry.tx, Err(Cancelled));
        }
    }

    /// Removes the entry with the given key. Returns `false` if the entry was
    /// already matched or swept.
    pub fn remove(&mut self, key: u64) -> bool {
        match self.entries.iter().position(|entry| entry.key == key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// `true` if no live waiter is present.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_live())
    }
}

/// A FIFO of suspended producers, each holding the value it is waiting to
/// place. The counterpart of [`WaitQueue`] for bounded containers.
#[derive(Debug)]
pub(crate) struct PutQueue<T> {
    entries: VecDeque<PutEntry<T>>,
    next_key: u64,
}

#[derive(Debug)]
struct PutEntry<T> {
    key: u64,
    value: T,
    cancel: Option<CancellationToken>,
    tx: oneshot::Sender<Result<(), Cancelled>>,
}

impl<T> PutEntry<T> {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| cancel.is_cancelled())
    }

    fn is_live(&self) -> bool {
        !self.tx.is_closed() && !self.is_cancelled()
    }
}

impl<T> PutQueue<T> {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_key: 0,
        }
    }

    pub fn enqueue(&mut self, value: T, cancel: Option<&CancellationToken>) -> Ticket<()> {
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        self.entries.push_back(PutEntry {
            key,
            value,
            cancel: cancel.cloned(),
            tx,
        });

        Ticket {
            key,
            rx,
            cancel: cancel.map(|cancel| Box::pin(cancel.clone().cancelled_owned())),
            done: false,
        }
    }

    /// Completes the oldest live producer and takes its pending value.
    pub fn resolve_next(&mut self, resume: &mut Resume<()>) -> Option<T> {
        while let Some(entry) = self.entries.pop_front() {
            if entry.tx.is_closed() {
                continue;
            }

            if entry.is_cancelled() {
                resume.push(entry.tx, Err(Cancelled));
                continue;
            }

            resume.push(entry.tx, Ok(()));
            return Some(entry.value);
        }

        None
    }

    /// Resolves every producer present as cancelled, dropping the pending
    /// values.
    pub fn cancel_all(&mut self, resume: &mut Resume<()>) {
        for entry in self.entries.drain(..) {
            if entry.tx.is_closed() {
                continue;
            }

            resume.push(entry.tx, Err(Cancelled));
        }
    }

    pub fn remove(&mut self, key: u64) -> bool {
        match self.entries.iter().position(|entry| entry.key == key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_live())
    }
}

/// A batch of pending waiter resumptions.
///
/// Matching a waiter decides the outcome while the container mutex is held,
/// but the resumption side effect (the channel send that wakes the suspended
/// task) must not run under that mutex. Operations collect their sends into a
/// `Resume` and the batch fires when it is dropped, after the critical
/// section. Broadcast operations return the batch to the caller, which may
/// hold it to defer the wakeups further.
#[derive(Debug)]
pub struct Resume<T> {
    batch: Vec<(oneshot::Sender<Result<T, Cancelled>>, Result<T, Cancelled>)>,
}

impl<T> Resume<T> {
    pub(crate) fn new() -> Self {
        Self { batch: Vec::new() }
    }

    fn push(&mut self, tx: oneshot::Sender<Result<T, Cancelled>>, result: Result<T, Cancelled>) {
        self.batch.push((tx, result));
    }

    /// The number of waiters this batch will resume.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

impl<T> Drop for Resume<T> {
    fn drop(&mut self) {
        for (tx, result) in self.batch.drain(..) {
            // The receiver may be gone; the waiter was dropped after being
            // matched and the result is discarded.
            let _ = tx.send(result);
        }
    }
}

/// The waiting half of a queue entry.
///
/// Owned by the container futures. `poll` first checks the result channel,
/// then the cancellation signal; the entry removal on cancellation is
/// delegated to `unregister` so the caller can re-enter the container mutex.
pub(crate) struct Ticket<T> {
    key: u64,
    rx: oneshot::Receiver<Result<T, Cancelled>>,
    cancel: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    done: bool,
}

impl<T> Ticket<T> {
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn poll(
        &mut self,
        cx: &mut Context<'_>,
        unregister: impl FnOnce(u64) -> bool,
    ) -> Poll<Result<T, Cancelled>> {
        assert!(!self.done, "waiter future polled after completion");

        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.done = true;
                return Poll::Ready(result);
            }
            // The sender was dropped without resolving. Only reachable when
            // the entry was removed through this ticket, i.e. never while it
            // is still queued.
            Poll::Ready(Err(_)) => {
                self.done = true;
                return Poll::Ready(Err(Cancelled));
            }
            Poll::Pending => (),
        }

        if let Some(cancel) = &mut self.cancel {
            if cancel.as_mut().poll(cx).is_ready() {
                if unregister(self.key) {
                    self.done = true;
                    return Poll::Ready(Err(Cancelled));
                }

                // The entry is gone: a counterpart matched this waiter before
                // the cancellation got hold of the mutex. The matched result
                // wins; it may still be in flight.
                return match self.rx.try_recv() {
                    Ok(result) => {
                        self.done = true;
                        Poll::Ready(result)
                    }
                    Err(TryRecvError::Empty) => {
                        self.cancel = None;
                        Poll::Pending
                    }
                    Err(TryRecvError::Closed) => {
                        self.done = true;
                        Poll::Ready(Err(Cancelled))
                    }
                };
            }
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::{PutQueue, Resume, WaitQueue};
    use crate::Cancelled;

    use tokio_util::sync::CancellationToken;

    #[test]
    fn resolve_is_fifo() {
        let mut queue = WaitQueue::new();
        let mut first = queue.enqueue(None);
        let mut second = queue.enqueue(None);

        let mut resume = Resume::new();
        assert_eq!(queue.resolve_next(1, &mut resume), None);
        drop(resume);

        assert_eq!(first.rx.try_recv().unwrap(), Ok(1));
        assert!(second.rx.try_recv().is_err());
    }

    #[test]
    fn resume_defers_sends() {
        let mut queue = WaitQueue::new();
        let mut ticket = queue.enqueue(None);

        let mut resume = Resume::new();
        assert_eq!(queue.resolve_next("a", &mut resume), None);

        // Still in flight until the batch is dropped.
        assert!(ticket.rx.try_recv().is_err());
        drop(resume);
        assert_eq!(ticket.rx.try_recv().unwrap(), Ok("a"));
    }

    #[test]
    fn cancelled_entries_do_not_match() {
        let token = CancellationToken::new();

        let mut queue = WaitQueue::new();
        let mut cancelled = queue.enqueue(Some(&token));
        let mut live = queue.enqueue(None);
        token.cancel();

        // The cancelled entry no longer counts, the live one still does.
        assert!(!queue.is_empty());

        let mut resume = Resume::new();
        assert_eq!(queue.resolve_next(7, &mut resume), None);
        drop(resume);

        assert_eq!(cancelled.rx.try_recv().unwrap(), Err(Cancelled));
        assert_eq!(live.rx.try_recv().unwrap(), Ok(7));
    }

    #[test]
    fn dropped_entries_are_swept() {
        let mut queue = WaitQueue::new();
        let dropped = queue.enqueue(None);
        drop(dropped);

        assert!(queue.is_empty());

        let mut resume = Resume::new();
        assert_eq!(queue.resolve_next(3, &mut resume), Some(3));
        assert!(resume.is_empty());
    }

    #[test]
    fn put_queue_yields_pending_values_in_order() {
        let mut queue = PutQueue::new();
        let mut first = queue.enqueue("a", None);
        let _second = queue.enqueue("b", None);

        let mut resume = Resume::new();
        assert_eq!(queue.resolve_next(&mut resume), Some("a"));
        drop(resume);

        assert_eq!(first.rx.try_recv().unwrap(), Ok(()));
        assert!(!queue.is_empty());
    }

    #[test]
    fn remove_unlinks_entry() {
        let mut queue = WaitQueue::new();
        let ticket = queue.enqueue(None);

        assert!(queue.remove(ticket.key()));
        assert!(!queue.remove(ticket.key()));

        let mut resume = Resume::new();
        assert_eq!(queue.resolve_next(1, &mut resume), Some(1));
    }

    #[test]
    fn is_empty_tracks_live_entries() {
        assert!(WaitQueue::<u32>::new().is_empty());
        assert!(PutQueue::<u32>::new().is_empty());

        let mut queue = WaitQueue::<u32>::new();
        let ticket = queue.enqueue(None);
        assert!(!queue.is_empty());

        drop(ticket);
        assert!(queue.is_empty());
    }
}
