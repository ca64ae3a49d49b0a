use futures_lite::future::{block_on, poll_once};
use task_sync::{BoundedQueue, Cancelled, Queue, Stack};
use tokio_util::sync::CancellationToken;

#[test]
fn stack_orders_lifo() {
    block_on(async {
        let stack = Stack::new();
        stack.push("A");
        stack.push("B");
        stack.push("C");

        assert_eq!(stack.pop().await, Ok("C"));
        assert_eq!(stack.pop().await, Ok("B"));
        assert_eq!(stack.pop().await, Ok("A"));
        assert_eq!(stack.len(), 0);
    });
}

#[test]
fn stack_try_ops() {
    let stack = Stack::new();
    assert_eq!(stack.try_pop(), None);
    assert_eq!(stack.try_peek(), None);

    stack.push(1);
    stack.push(2);
    assert_eq!(stack.try_peek(), Some(2));
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.try_pop(), Some(2));
    assert_eq!(stack.try_pop(), Some(1));
    assert_eq!(stack.try_pop(), None);
}

#[test]
fn queue_waiters_are_fifo() {
    block_on(async {
        let queue = Queue::new();
        let mut first = queue.dequeue();
        let mut second = queue.dequeue();
        let mut third = queue.dequeue();

        queue.enqueue("A");
        assert_eq!(poll_once(&mut first).await, Some(Ok("A")));
        assert_eq!(poll_once(&mut second).await, None);
        assert_eq!(poll_once(&mut third).await, None);

        queue.enqueue("B");
        assert_eq!(poll_once(&mut second).await, Some(Ok("B")));
        assert_eq!(poll_once(&mut third).await, None);

        queue.enqueue("C");
        assert_eq!(poll_once(&mut third).await, Some(Ok("C")));
        assert_eq!(queue.len(), 0);
    });
}

#[test]
fn queue_round_trips_in_order() {
    block_on(async {
        let queue = Queue::new();
        for value in 0..16 {
            queue.enqueue(value);
        }

        for value in 0..16 {
            assert_eq!(queue.dequeue().await, Ok(value));
        }
        assert!(queue.is_empty());
    });
}

#[test]
fn queue_dropped_waiter_gives_up_its_turn() {
    block_on(async {
        let queue = Queue::new();
        let first = queue.dequeue();
        let mut second = queue.dequeue();
        drop(first);

        queue.enqueue("A");
        assert_eq!(poll_once(&mut second).await, Some(Ok("A")));
    });
}

#[test]
fn stack_cancel_after_suspending() {
    block_on(async {
        let stack = Stack::new();
        let cancel = CancellationToken::new();

        let mut pop = stack.pop_with_cancel(&cancel);
        cancel.cancel();
        stack.push("A");

        assert_eq!(poll_once(&mut pop).await, Some(Err(Cancelled)));
        assert_eq!(stack.len(), 1);
    });
}

#[test]
fn pre_cancelled_pop_leaves_values_alone() {
    block_on(async {
        let stack = Stack::new();
        stack.push("A");

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(stack.pop_with_cancel(&cancel).await, Err(Cancelled));
        assert_eq!(stack.len(), 1);
    });
}

#[test]
fn queue_broadcast_completion() {
    block_on(async {
        let queue = Queue::new();
        let mut first = queue.dequeue();
        let mut second = queue.dequeue();
        let mut third = queue.dequeue();

        let resume = queue.complete_all_dequeue("X");
        assert_eq!(resume.len(), 3);
        drop(resume);

        assert_eq!(poll_once(&mut first).await, Some(Ok("X")));
        assert_eq!(poll_once(&mut second).await, Some(Ok("X")));
        assert_eq!(poll_once(&mut third).await, Some(Ok("X")));

        // Consumers arriving afterwards are unaffected.
        let mut late = queue.dequeue();
        assert_eq!(poll_once(&mut late).await, None);
    });
}

#[test]
fn stack_broadcast_cancel() {
    block_on(async {
        let stack = Stack::<u32>::new();
        let mut first = stack.pop();
        let mut second = stack.pop();

        let resume = stack.cancel_all_pop();
        assert_eq!(resume.len(), 2);
        drop(resume);

        assert_eq!(poll_once(&mut first).await, Some(Err(Cancelled)));
        assert_eq!(poll_once(&mut second).await, Some(Err(Cancelled)));
    });
}

#[test]
fn bounded_applies_backpressure() {
    block_on(async {
        let queue = BoundedQueue::new(3);

        let mut pending = Vec::new();
        for value in ["A", "B", "C", "D", "E", "F"] {
            let mut enqueue = queue.enqueue(value);
            match poll_once(&mut enqueue).await {
                Some(result) => assert_eq!(result, Ok(())),
                None => pending.push(enqueue),
            }
        }
        assert_eq!(pending.len(), 3);
        assert_eq!(queue.len(), 3);

        // Each dequeue frees a slot and pulls the oldest waiting producer in.
        for (expected, producer) in ["A", "B", "C"].into_iter().zip(&mut pending) {
            assert_eq!(queue.dequeue().await, Ok(expected));
            assert_eq!(poll_once(producer).await, Some(Ok(())));
        }

        for expected in ["D", "E", "F"] {
            assert_eq!(queue.dequeue().await, Ok(expected));
        }
        assert_eq!(queue.len(), 0);
    });
}

#[test]
fn bounded_try_enqueue_hands_back_on_full() {
    let queue = BoundedQueue::new(1);
    assert_eq!(queue.try_enqueue("A"), Ok(()));
    assert_eq!(queue.try_enqueue("B"), Err("B"));
    assert_eq!(queue.try_peek(), Some("A"));
    assert_eq!(queue.try_dequeue(), Some("A"));
    assert_eq!(queue.try_dequeue(), None);
}

#[test]
fn zero_capacity_rendezvous() {
    block_on(async {
        let queue = BoundedQueue::new(0);

        let mut dequeue = queue.dequeue();
        assert_eq!(poll_once(&mut dequeue).await, None);

        assert_eq!(queue.try_enqueue("A"), Ok(()));
        assert_eq!(poll_once(&mut dequeue).await, Some(Ok("A")));
        assert_eq!(queue.len(), 0);

        // The mirror image: a producer suspends until a consumer arrives.
        let mut enqueue = queue.enqueue("B");
        assert_eq!(poll_once(&mut enqueue).await, None);
        assert_eq!(queue.try_dequeue(), Some("B"));
        assert_eq!(poll_once(&mut enqueue).await, Some(Ok(())));
        assert_eq!(queue.len(), 0);
    });
}

#[test]
fn zero_capacity_try_enqueue_needs_a_consumer() {
    let queue = BoundedQueue::new(0);
    assert_eq!(queue.try_enqueue("A"), Err("A"));
}

#[test]
fn bounded_cancelled_producer_does_not_deliver() {
    block_on(async {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_enqueue("A"), Ok(()));

        let cancel = CancellationToken::new();
        let mut enqueue = queue.enqueue_with_cancel("B", &cancel);
        assert_eq!(poll_once(&mut enqueue).await, None);
        cancel.cancel();

        // The freed slot skips the cancelled producer.
        assert_eq!(queue.try_dequeue(), Some("A"));
        assert_eq!(poll_once(&mut enqueue).await, Some(Err(Cancelled)));
        assert_eq!(queue.len(), 0);
    });
}

#[test]
fn bounded_dropped_producer_is_swept() {
    block_on(async {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_enqueue("A"), Ok(()));

        let dropped = queue.enqueue("B");
        let mut live = queue.enqueue("C");
        assert_eq!(poll_once(&mut live).await, None);
        drop(dropped);

        assert_eq!(queue.try_dequeue(), Some("A"));
        assert_eq!(poll_once(&mut live).await, Some(Ok(())));
        assert_eq!(queue.try_dequeue(), Some("C"));
    });
}

#[test]
fn bounded_complete_all_enqueue_places_pending_values() {
    block_on(async {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_enqueue("A"), Ok(()));

        let mut second = queue.enqueue("B");
        let mut third = queue.enqueue("C");
        assert_eq!(poll_once(&mut second).await, None);
        assert_eq!(poll_once(&mut third).await, None);

        let resume = queue.complete_all_enqueue();
        assert_eq!(resume.len(), 2);
        drop(resume);

        assert_eq!(poll_once(&mut second).await, Some(Ok(())));
        assert_eq!(poll_once(&mut third).await, Some(Ok(())));

        // The pending values were force-placed beyond the capacity.
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue(), Some("A"));
        assert_eq!(queue.try_dequeue(), Some("B"));
        assert_eq!(queue.try_dequeue(), Some("C"));
    });
}

#[test]
fn bounded_cancel_all_enqueue_drops_pending_values() {
    block_on(async {
        let queue = BoundedQueue::new(0);
        let mut enqueue = queue.enqueue("A");
        assert_eq!(poll_once(&mut enqueue).await, None);

        let resume = queue.cancel_all_enqueue();
        assert_eq!(resume.len(), 1);
        drop(resume);

        assert_eq!(poll_once(&mut enqueue).await, Some(Err(Cancelled)));
        assert_eq!(queue.try_dequeue(), None);
    });
}

#[test]
fn bounded_broadcast_dequeue() {
    block_on(async {
        let queue = BoundedQueue::<&str>::new(2);
        let mut first = queue.dequeue();
        let mut second = queue.dequeue();

        let resume = queue.complete_all_dequeue("X");
        assert_eq!(resume.len(), 2);
        drop(resume);

        assert_eq!(poll_once(&mut first).await, Some(Ok("X")));
        assert_eq!(poll_once(&mut second).await, Some(Ok("X")));

        let mut third = queue.dequeue();
        let resume = queue.cancel_all_dequeue();
        assert_eq!(resume.len(), 1);
        drop(resume);
        assert_eq!(poll_once(&mut third).await, Some(Err(Cancelled)));
    });
}

#[test]
fn bounded_enqueue_prefers_waiting_consumer() {
    block_on(async {
        let queue = BoundedQueue::new(2);
        let mut dequeue = queue.dequeue();
        assert_eq!(poll_once(&mut dequeue).await, None);

        // The value goes to the waiter, not to storage.
        queue.enqueue("A").await.unwrap();
        assert_eq!(queue.len(), 0);
        assert_eq!(poll_once(&mut dequeue).await, Some(Ok("A")));
    });
}

#[test]
fn cancel_loses_the_race_to_a_match() {
    block_on(async {
        let queue = Queue::new();
        let cancel = CancellationToken::new();

        let mut dequeue = queue.dequeue_with_cancel(&cancel);
        queue.enqueue("A");
        cancel.cancel();

        // The match was decided first; cancellation is a no-op.
        assert_eq!(poll_once(&mut dequeue).await, Some(Ok("A")));
    });
}
