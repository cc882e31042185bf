// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synthetic bag-clock publication.
//!
//! When replay is asked to publish bag time (`-b HZ`), a side thread emits
//! [`Clock`] samples on `/time` at the requested frequency. The clock's
//! "now" tracks the recorded timeline: anchored to a record time, advancing
//! at the player's rate while running, frozen while paused, and jumped in
//! steps while stepping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rosrt::msg::{Clock, Stamp};
use rosrt::NodeHandle;

struct ClockState {
    running: bool,
    anchor_record_ns: u64,
    anchor_wall: Instant,
    scale: f64,
}

impl ClockState {
    fn current_ns(&self) -> u64 {
        if !self.running {
            return self.anchor_record_ns;
        }
        let elapsed = self.anchor_wall.elapsed().as_nanos() as f64 * self.scale;
        self.anchor_record_ns.saturating_add(elapsed as u64)
    }
}

/// Owns the `/time` publisher and its emission thread.
pub struct ClockPublisher {
    state: Arc<Mutex<ClockState>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ClockPublisher {
    /// Advertise `/time` and start emitting at `hz`. The clock starts
    /// frozen at zero until [`ClockPublisher::start_at`] or
    /// [`ClockPublisher::step_to`] anchors it.
    pub fn spawn(nh: &NodeHandle, hz: u32, scale: f64) -> rosrt::Result<Self> {
        let publisher = nh.advertise::<Clock>("/time", 1)?;
        let state = Arc::new(Mutex::new(ClockState {
            running: false,
            anchor_record_ns: 0,
            anchor_wall: Instant::now(),
            scale,
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let period = Duration::from_secs_f64(1.0 / f64::from(hz.max(1)));
        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("rosplay-clock".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let now_ns = thread_state.lock().current_ns();
                    let sample = Clock {
                        clock: Stamp::from_nanos(now_ns),
                    };
                    if publisher.publish(&sample).is_err() {
                        return;
                    }
                    std::thread::sleep(period);
                }
            })
            .ok();

        Ok(Self {
            state,
            stop,
            thread,
        })
    }

    /// Anchor the clock at `record_ns` and let it advance at the replay
    /// rate.
    pub fn start_at(&self, record_ns: u64) {
        let mut state = self.state.lock();
        state.running = true;
        state.anchor_record_ns = record_ns;
        state.anchor_wall = Instant::now();
    }

    /// Freeze the clock at its current value.
    pub fn freeze(&self) {
        let mut state = self.state.lock();
        state.anchor_record_ns = state.current_ns();
        state.running = false;
    }

    /// Jump to `record_ns` and stay frozen (single-step emission).
    pub fn step_to(&self, record_ns: u64) {
        let mut state = self.state.lock();
        state.anchor_record_ns = record_ns;
        state.running = false;
    }

    /// The clock's current recorded-timeline value.
    pub fn now_ns(&self) -> u64 {
        self.state.lock().current_ns()
    }
}

impl Drop for ClockPublisher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(running: bool, anchor: u64, scale: f64) -> ClockState {
        ClockState {
            running,
            anchor_record_ns: anchor,
            anchor_wall: Instant::now(),
            scale,
        }
    }

    #[test]
    fn frozen_clock_holds_its_anchor() {
        let s = state(false, 5_000, 2.0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(s.current_ns(), 5_000);
    }

    #[test]
    fn running_clock_advances_at_scale() {
        let s = state(true, 0, 2.0);
        std::thread::sleep(Duration::from_millis(20));
        let now = s.current_ns();
        // Roughly 2x wall time; generous bounds for scheduler noise.
        assert!(now >= 30_000_000, "advanced only {}ns", now);
        assert!(now <= 400_000_000, "advanced {}ns", now);
    }
}
