// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Callback queues: deferred invocation records drained by worker threads.
//!
//! Incoming messages, service invocations, and connection events are posted
//! as [`CallbackItem`]s. The queue is agnostic to what an item does; before
//! invoking it asks the item for readiness and honors the returned
//! [`CallOutcome`]. Within one drain each item is examined at most once, so
//! a never-ready item cannot starve the rest of the queue.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Per-call outcome reported by an item's readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Invoke exactly once, then discard.
    Ready,
    /// Re-append to the queue tail; an external precondition is missing
    /// (e.g. a topic handshake has not completed yet).
    Retry,
    /// Discard silently (tracked object gone, registration withdrawn).
    Drop,
}

/// A deferred invocation record.
///
/// Items are opaque to the queue: the target callable, any liveness guard,
/// and the owning-queue identity are captured inside the item at
/// registration time.
pub trait CallbackItem: Send {
    /// Readiness check, called with no queue lock held.
    fn ready(&self) -> CallOutcome {
        CallOutcome::Ready
    }

    /// Run the deferred call. Consumes the item.
    fn invoke(self: Box<Self>);
}

struct Inner {
    items: VecDeque<Box<dyn CallbackItem>>,
    enabled: bool,
}

/// FIFO queue of callback items with blocking drain operations.
///
/// `push` is total-ordered under a single writer and FIFO per writer under
/// multiple writers. Disabled queues refuse pushes (items are dropped) and
/// wake any blocked drainers.
pub struct CallbackQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                enabled: true,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item and wake at most one waiter. On a disabled queue the
    /// item is dropped.
    pub fn push(&self, item: Box<dyn CallbackItem>) {
        {
            let mut inner = self.inner.lock();
            if !inner.enabled {
                return;
            }
            inner.items.push_back(item);
        }
        self.available.notify_one();
    }

    /// Drain every item currently in the queue, blocking up to `timeout`
    /// if it is empty. Returns the number of items invoked.
    pub fn call_available(&self, timeout: Duration) -> usize {
        let mut batch = {
            let mut inner = self.inner.lock();
            if inner.items.is_empty() && inner.enabled && !timeout.is_zero() {
                self.available.wait_for(&mut inner, timeout);
            }
            if !inner.enabled {
                return 0;
            }
            std::mem::take(&mut inner.items)
        };

        let mut invoked = 0;
        let mut retries: Vec<Box<dyn CallbackItem>> = Vec::new();
        while let Some(item) = batch.pop_front() {
            match item.ready() {
                CallOutcome::Ready => {
                    item.invoke();
                    invoked += 1;
                }
                CallOutcome::Retry => retries.push(item),
                CallOutcome::Drop => {}
            }
        }

        if !retries.is_empty() {
            let mut inner = self.inner.lock();
            if inner.enabled {
                for item in retries {
                    inner.items.push_back(item);
                }
            }
        }
        invoked
    }

    /// Drain exactly one ready item, blocking up to `timeout` if the queue
    /// is empty. Returns whether an item was invoked.
    ///
    /// Items answering `Retry` are moved to the tail and not re-examined
    /// during this call; `Drop` items are discarded.
    pub fn call_one(&self, timeout: Duration) -> bool {
        let limit = {
            let mut inner = self.inner.lock();
            if inner.items.is_empty() && inner.enabled && !timeout.is_zero() {
                self.available.wait_for(&mut inner, timeout);
            }
            if !inner.enabled {
                return false;
            }
            inner.items.len()
        };

        let mut retries: Vec<Box<dyn CallbackItem>> = Vec::new();
        let mut invoked = false;
        let mut examined = 0;
        while examined < limit {
            let item = {
                let mut inner = self.inner.lock();
                if !inner.enabled {
                    break;
                }
                match inner.items.pop_front() {
                    Some(item) => item,
                    None => break,
                }
            };
            examined += 1;
            match item.ready() {
                CallOutcome::Ready => {
                    item.invoke();
                    invoked = true;
                    break;
                }
                CallOutcome::Retry => retries.push(item),
                CallOutcome::Drop => {}
            }
        }

        if !retries.is_empty() {
            let mut inner = self.inner.lock();
            if inner.enabled {
                for item in retries {
                    inner.items.push_back(item);
                }
            }
        }
        invoked
    }

    /// Refuse further pushes and wake all blocked drainers. Items already
    /// queued remain until cleared or the queue is re-enabled.
    pub fn disable(&self) {
        {
            let mut inner = self.inner.lock();
            inner.enabled = false;
        }
        self.available.notify_all();
    }

    /// Re-allow pushes after [`CallbackQueue::disable`].
    pub fn enable(&self) {
        let mut inner = self.inner.lock();
        inner.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Discard all queued items without invoking them.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

impl std::fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallbackQueue")
            .field("len", &inner.items.len())
            .field("enabled", &inner.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        id: usize,
        log: Arc<parking_lot::Mutex<Vec<usize>>>,
        outcome: CallOutcome,
    }

    impl CallbackItem for Recorder {
        fn ready(&self) -> CallOutcome {
            self.outcome
        }

        fn invoke(self: Box<Self>) {
            self.log.lock().push(self.id);
        }
    }

    fn recorder(
        id: usize,
        log: &Arc<parking_lot::Mutex<Vec<usize>>>,
        outcome: CallOutcome,
    ) -> Box<Recorder> {
        Box::new(Recorder {
            id,
            log: Arc::clone(log),
            outcome,
        })
    }

    #[test]
    fn drains_in_push_order() {
        let queue = CallbackQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for id in 0..5 {
            queue.push(recorder(id, &log, CallOutcome::Ready));
        }
        assert_eq!(queue.call_available(Duration::ZERO), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn retry_item_does_not_starve_the_drain() {
        let queue = CallbackQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        queue.push(recorder(0, &log, CallOutcome::Retry));
        queue.push(recorder(1, &log, CallOutcome::Ready));
        queue.push(recorder(2, &log, CallOutcome::Ready));

        // The retry item is examined once and re-queued; both ready items run.
        assert_eq!(queue.call_available(Duration::ZERO), 2);
        assert_eq!(*log.lock(), vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drop_outcome_discards_silently() {
        let queue = CallbackQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        queue.push(recorder(0, &log, CallOutcome::Drop));
        queue.push(recorder(1, &log, CallOutcome::Ready));

        assert_eq!(queue.call_available(Duration::ZERO), 1);
        assert_eq!(*log.lock(), vec![1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn call_one_invokes_exactly_one() {
        let queue = CallbackQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        queue.push(recorder(0, &log, CallOutcome::Ready));
        queue.push(recorder(1, &log, CallOutcome::Ready));

        assert!(queue.call_one(Duration::ZERO));
        assert_eq!(*log.lock(), vec![0]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn call_one_skips_past_retry_and_drop() {
        let queue = CallbackQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        queue.push(recorder(0, &log, CallOutcome::Retry));
        queue.push(recorder(1, &log, CallOutcome::Drop));
        queue.push(recorder(2, &log, CallOutcome::Ready));

        assert!(queue.call_one(Duration::ZERO));
        assert_eq!(*log.lock(), vec![2]);
        // The retry item survives at the tail.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn disabled_queue_refuses_push_and_wakes_waiters() {
        let queue = Arc::new(CallbackQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.call_available(Duration::from_secs(10)))
        };
        // Give the waiter time to block, then disable.
        std::thread::sleep(Duration::from_millis(50));
        queue.disable();
        assert_eq!(waiter.join().unwrap(), 0);

        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        queue.push(recorder(0, &log, CallOutcome::Ready));
        assert!(queue.is_empty());

        queue.enable();
        queue.push(recorder(1, &log, CallOutcome::Ready));
        assert_eq!(queue.call_available(Duration::ZERO), 1);
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn empty_queue_times_out() {
        let queue = CallbackQueue::new();
        let start = std::time::Instant::now();
        assert_eq!(queue.call_available(Duration::from_millis(50)), 0);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn concurrent_workers_each_take_distinct_items() {
        let queue = Arc::new(CallbackQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        struct Count(Arc<AtomicUsize>);
        impl CallbackItem for Count {
            fn invoke(self: Box<Self>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        for _ in 0..100 {
            queue.push(Box::new(Count(Arc::clone(&counter))));
        }

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || while queue.call_one(Duration::ZERO) {})
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
