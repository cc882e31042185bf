// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Spinners: scheduling strategies that drain callback queues.
//!
//! User callbacks only ever run on spinner-driven threads (or the caller's
//! thread under [`spin`]/[`spin_once`]); transport threads never invoke
//! user code. All strategies observe the node's OK flag and exit within
//! one timeout quantum (100 ms) of it flipping false.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::NodeHandle;
use crate::queue::CallbackQueue;

const QUANTUM: Duration = Duration::from_millis(100);

/// Drive the global callback queue on the caller's thread until the node
/// shuts down. Callbacks assigned to custom queues are not processed.
pub fn spin(nh: &NodeHandle) {
    SingleThreadedSpinner::default().spin(nh);
}

/// Run one non-blocking drain of the global callback queue. A no-op when
/// no node is running.
pub fn spin_once() {
    if let Ok(node) = crate::node::current_node() {
        node.global_queue().call_available(Duration::ZERO);
    }
}

/// Single-threaded strategy: repeated bounded-wait drains on the calling
/// thread, so callback invocation order equals enqueue order.
#[derive(Debug, Clone)]
pub struct SingleThreadedSpinner {
    timeout: Duration,
}

impl Default for SingleThreadedSpinner {
    fn default() -> Self {
        Self { timeout: QUANTUM }
    }
}

impl SingleThreadedSpinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spin the global queue until `nh.ok()` turns false.
    pub fn spin(&self, nh: &NodeHandle) {
        self.spin_queue(nh, nh.node().global_queue());
    }

    /// Spin a specific queue (e.g. a subscriber's private queue, which is
    /// how per-subscription serialization is obtained).
    pub fn spin_queue(&self, nh: &NodeHandle, queue: &Arc<CallbackQueue>) {
        while nh.ok() {
            if !queue.is_enabled() {
                std::thread::sleep(self.timeout);
                continue;
            }
            queue.call_available(self.timeout);
        }
    }
}

/// Multi-threaded strategy: N workers each looping `call_one` on a shared
/// queue. Start order matches enqueue order, completion order is
/// arbitrary, and callbacks of one subscription may run concurrently for
/// different messages — no per-subscription serialization is offered.
/// Subscribers that need it should install a private queue and drive it
/// with a [`SingleThreadedSpinner`].
#[derive(Debug, Clone)]
pub struct MultiThreadedSpinner {
    thread_count: usize,
}

impl Default for MultiThreadedSpinner {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Self {
            thread_count: threads,
        }
    }
}

impl MultiThreadedSpinner {
    /// A spinner with `thread_count` workers; zero is rejected.
    pub fn new(thread_count: usize) -> Result<Self> {
        if thread_count == 0 {
            return Err(Error::InvalidState(
                "multi-threaded spinner needs at least one thread".to_string(),
            ));
        }
        Ok(Self { thread_count })
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Spin the global queue until shutdown. Owns its worker threads and
    /// joins them all before returning.
    pub fn spin(&self, nh: &NodeHandle) {
        self.spin_queue(nh, nh.node().global_queue());
    }

    /// Spin a specific queue with this spinner's worker pool.
    pub fn spin_queue(&self, nh: &NodeHandle, queue: &Arc<CallbackQueue>) {
        let workers: Vec<_> = (0..self.thread_count)
            .map(|index| {
                let nh = nh.clone();
                let queue = Arc::clone(queue);
                std::thread::Builder::new()
                    .name(format!("rosrt-spin-{}", index))
                    .spawn(move || {
                        while nh.ok() {
                            if !queue.is_enabled() {
                                std::thread::sleep(QUANTUM);
                                continue;
                            }
                            queue.call_one(QUANTUM);
                        }
                    })
            })
            .collect();
        for worker in workers.into_iter().flatten() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(MultiThreadedSpinner::new(0).is_err());
        assert_eq!(MultiThreadedSpinner::new(3).unwrap().thread_count(), 3);
        assert!(MultiThreadedSpinner::default().thread_count() >= 1);
    }
}
