// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound payload dispatch: transport frame -> typed object -> queued
//! callback item.
//!
//! Dispatch runs on transport (or publish) threads and never invokes user
//! code itself; it only decodes and enqueues. Decode failures increment a
//! per-subscription counter and drop the frame. A subscription with
//! `queue_size` items already pending discards the frame with a counter
//! increment.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::queue::{CallOutcome, CallbackItem};
use crate::registry::{Snapshot, Subscription};
use crate::tracked::Pin;

/// Fan one serialized payload out to every subscription on `topic`.
pub(crate) fn dispatch_payload(snapshot: &Snapshot, topic: &str, payload: &[u8]) {
    for subscription in snapshot.subscriptions(topic) {
        offer(subscription, payload);
    }
}

fn offer(subscription: &Arc<Subscription>, payload: &[u8]) {
    if subscription.guard.attempt_pin().is_gone() {
        return;
    }
    if subscription.pending.load(Ordering::Acquire) >= subscription.queue_size {
        subscription.record_overflow();
        return;
    }
    let message = match (subscription.deserialize)(payload) {
        Ok(message) => message,
        Err(e) => {
            subscription.record_decode_error();
            log::debug!("dropping undecodable frame on '{}': {}", subscription.name, e);
            return;
        }
    };
    subscription.pending.fetch_add(1, Ordering::AcqRel);
    let queue = Arc::clone(&subscription.queue);
    queue.push(Box::new(MessageItem {
        subscription: Arc::clone(subscription),
        message: Some(message),
    }));
}

/// A decoded message waiting on a callback queue.
struct MessageItem {
    subscription: Arc<Subscription>,
    message: Option<Arc<dyn Any + Send + Sync>>,
}

impl CallbackItem for MessageItem {
    fn ready(&self) -> CallOutcome {
        if self.subscription.guard.attempt_pin().is_gone() {
            CallOutcome::Drop
        } else {
            CallOutcome::Ready
        }
    }

    fn invoke(mut self: Box<Self>) {
        let Some(message) = self.message.take() else {
            return;
        };
        match self.subscription.guard.attempt_pin() {
            Pin::Pinned(_strong) => {
                // `_strong` keeps the tracked object alive for the call.
                (self.subscription.invoke)(message);
            }
            Pin::Gone => {}
        }
    }
}

impl Drop for MessageItem {
    fn drop(&mut self) {
        // Runs whether the item was invoked, dropped by the queue, or
        // discarded with the queue itself; the pending slot is returned
        // exactly once.
        self.subscription.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{Master, MemoryMaster};
    use crate::msg::{Message, Text, TypeDescriptor};
    use crate::queue::CallbackQueue;
    use crate::registry::{Registry, SubscriptionOptions};
    use crate::tracked::TrackedObject;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_registry() -> Arc<Registry> {
        Registry::new(
            "/dispatch_test".to_string(),
            "rosrt://127.0.0.1:1".to_string(),
            Arc::new(MemoryMaster::new()) as Arc<dyn Master>,
        )
    }

    fn text_subscription(
        registry: &Arc<Registry>,
        name: &str,
        queue: &Arc<CallbackQueue>,
        queue_size: usize,
        tracked: Option<TrackedObject>,
        seen: &Arc<parking_lot::Mutex<Vec<String>>>,
    ) -> (Arc<Subscription>, crate::registry::SubscriptionToken) {
        let log = Arc::clone(seen);
        let (sub, _uris, token) = registry
            .ensure_subscription(SubscriptionOptions {
                name: name.to_string(),
                ty: TypeDescriptor::of::<Text>(),
                queue_size,
                deserialize: Arc::new(|bytes: &[u8]| {
                    Ok(Arc::new(Text::decode(bytes)?) as Arc<dyn std::any::Any + Send + Sync>)
                }),
                invoke: Arc::new(move |message| {
                    if let Ok(text) = message.downcast::<Text>() {
                        log.lock().push(text.data.clone());
                    }
                }),
                tracked,
                queue: Arc::clone(queue),
            })
            .unwrap();
        (sub, token)
    }

    fn encoded(data: &str) -> Vec<u8> {
        crate::msg::encode_to_vec(&Text::new(data)).unwrap()
    }

    #[test]
    fn frames_become_ordered_callbacks() {
        let registry = test_registry();
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (_sub, _token) = text_subscription(&registry, "/chat", &queue, 16, None, &seen);

        let snapshot = registry.snapshot();
        for i in 0..3 {
            dispatch_payload(&snapshot, "/chat", &encoded(&format!("m{}", i)));
        }
        assert_eq!(queue.call_available(Duration::ZERO), 3);
        assert_eq!(*seen.lock(), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn undecodable_frames_are_counted_not_raised() {
        let registry = test_registry();
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (sub, _token) = text_subscription(&registry, "/chat", &queue, 16, None, &seen);

        dispatch_payload(&registry.snapshot(), "/chat", &[0xFF, 0xFF, 0xFF]);
        assert_eq!(sub.decode_errors(), 1);
        assert_eq!(queue.call_available(Duration::ZERO), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn pending_messages_beyond_queue_size_are_discarded() {
        let registry = test_registry();
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (sub, _token) = text_subscription(&registry, "/chat", &queue, 2, None, &seen);

        let snapshot = registry.snapshot();
        for i in 0..5 {
            dispatch_payload(&snapshot, "/chat", &encoded(&format!("m{}", i)));
        }
        assert_eq!(sub.overflow_drops(), 3);
        assert_eq!(queue.call_available(Duration::ZERO), 2);
        assert_eq!(*seen.lock(), vec!["m0", "m1"]);

        // Slots freed by the drain accept new messages again.
        dispatch_payload(&snapshot, "/chat", &encoded("late"));
        assert_eq!(queue.call_available(Duration::ZERO), 1);
    }

    #[test]
    fn tracked_object_destruction_suppresses_queued_invocations() {
        let registry = test_registry();
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let target = Arc::new(AtomicUsize::new(0));
        let (_sub, _token) = text_subscription(
            &registry,
            "/chat",
            &queue,
            16,
            Some(TrackedObject::new(&target)),
            &seen,
        );

        let snapshot = registry.snapshot();
        dispatch_payload(&snapshot, "/chat", &encoded("before"));
        dispatch_payload(&snapshot, "/chat", &encoded("also before"));
        drop(target);

        // Both queued items drain without a single user callback.
        assert_eq!(queue.call_available(Duration::ZERO), 0);
        assert!(seen.lock().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn released_subscription_drains_without_invoking() {
        let registry = test_registry();
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (_sub, token) = text_subscription(&registry, "/chat", &queue, 16, None, &seen);

        dispatch_payload(&registry.snapshot(), "/chat", &encoded("pending"));
        token.release();

        assert_eq!(queue.call_available(Duration::ZERO), 0);
        assert!(seen.lock().is_empty());
    }
}
