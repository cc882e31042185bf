// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveness guards for queued callbacks.
//!
//! A registration can track a user object by weak reference. Before a
//! queued callback runs, the worker pins the object: a successful pin
//! yields a strong reference held for exactly the duration of the call, a
//! failed pin suppresses the call. The tracked target must not be the
//! registration handle itself, or the weak reference could never expire.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Weak reference to a user object whose destruction disables callbacks.
#[derive(Clone)]
pub struct TrackedObject {
    target: Weak<dyn Any + Send + Sync>,
}

impl TrackedObject {
    pub fn new<T: Send + Sync + 'static>(object: &Arc<T>) -> Self {
        let object: Arc<dyn Any + Send + Sync> = object.clone();
        let target: Weak<dyn Any + Send + Sync> = Arc::downgrade(&object);
        Self { target }
    }

    fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.target.upgrade()
    }
}

impl std::fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedObject")
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// Outcome of a pin attempt.
pub enum Pin {
    /// Target alive (or no target tracked); the strong reference, if any,
    /// must be kept on the invoking worker's stack until the callback
    /// returns.
    Pinned(Option<Arc<dyn Any + Send + Sync>>),
    /// Target destroyed or registration withdrawn; skip the call.
    Gone,
}

impl Pin {
    pub fn is_gone(&self) -> bool {
        matches!(self, Pin::Gone)
    }
}

/// Combined liveness check for one registration: the registration's own
/// withdrawn flag plus the optional user tracked object.
#[derive(Clone)]
pub struct LivenessGuard {
    tracked: Option<TrackedObject>,
    alive: Arc<AtomicBool>,
}

impl LivenessGuard {
    pub fn new(tracked: Option<TrackedObject>) -> Self {
        Self {
            tracked,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the registration withdrawn. Queued items addressed to it drain
    /// without invoking.
    pub fn revoke(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn is_revoked(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }

    /// Attempt to pin the tracked object for an invocation.
    pub fn attempt_pin(&self) -> Pin {
        if self.is_revoked() {
            return Pin::Gone;
        }
        match &self.tracked {
            None => Pin::Pinned(None),
            Some(tracked) => match tracked.upgrade() {
                Some(strong) => Pin::Pinned(Some(strong)),
                None => Pin::Gone,
            },
        }
    }
}

impl std::fmt::Debug for LivenessGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessGuard")
            .field("revoked", &self.is_revoked())
            .field("has_tracked", &self.tracked.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_without_tracked_object_succeeds() {
        let guard = LivenessGuard::new(None);
        assert!(!guard.attempt_pin().is_gone());
    }

    #[test]
    fn pin_fails_after_target_drop() {
        let object = Arc::new(42u32);
        let guard = LivenessGuard::new(Some(TrackedObject::new(&object)));
        assert!(!guard.attempt_pin().is_gone());

        drop(object);
        assert!(guard.attempt_pin().is_gone());
    }

    #[test]
    fn pin_holds_the_target_alive() {
        let object = Arc::new(String::from("payload"));
        let guard = LivenessGuard::new(Some(TrackedObject::new(&object)));

        let pin = guard.attempt_pin();
        let strong = match pin {
            Pin::Pinned(Some(strong)) => strong,
            _ => panic!("expected a pinned strong reference"),
        };
        drop(object);
        // The pin keeps the referent alive until released.
        assert!(strong.downcast_ref::<String>().is_some());
        drop(strong);
        assert!(guard.attempt_pin().is_gone());
    }

    #[test]
    fn revoke_suppresses_even_live_targets() {
        let object = Arc::new(7u8);
        let guard = LivenessGuard::new(Some(TrackedObject::new(&object)));
        guard.revoke();
        assert!(guard.attempt_pin().is_gone());
    }
}
