// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-warped replay of recorded message streams.
//!
//! The player reads envelopes from one or more bags in record order and
//! republishes them on a synthetic schedule:
//! `play_time = wall_start + (record_time - first_record_time) / scale +
//! shift`, where `shift` accumulates advertise sleeps and pause durations
//! so recorded gaps stay faithful. Each topic is advertised exactly once
//! per run, with a configurable sleep afterwards to let subscribers
//! attach. Space toggles pause; `s` while paused emits exactly one
//! envelope and stays paused.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;

use rosrt::{NodeHandle, RawPublisher, TypeDescriptor};

use crate::bag::{BagError, BagReader, Envelope, MergedReader};
use crate::clock::ClockPublisher;

/// Replay errors.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("bag error: {0}")]
    Bag(#[from] BagError),

    #[error("node error: {0}")]
    Node(#[from] rosrt::Error),

    #[error("time scale must be positive, got {0}")]
    InvalidTimeScale(f64),
}

/// Player configuration.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Suppress the current-log-time progress line.
    pub quiet: bool,
    /// Publish every message immediately, without inter-message waits.
    pub at_once: bool,
    /// Begin in paused mode.
    pub start_paused: bool,
    /// Wall-time-per-recorded-second multiplier; larger plays faster.
    pub time_scale: f64,
    /// Sleep after each advertisement, letting subscribers attach.
    pub advertise_sleep: Duration,
    /// Skip envelopes recorded within this offset from the head.
    pub start_offset: Duration,
    /// Outgoing queue size per advertised topic (0 uses the minimum).
    pub queue_size: usize,
    /// Publish the bag clock on `/time` at this frequency.
    pub bag_time_hz: Option<u32>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            at_once: false,
            start_paused: false,
            time_scale: 1.0,
            advertise_sleep: Duration::from_millis(200),
            start_offset: Duration::ZERO,
            queue_size: 0,
            bag_time_hz: None,
        }
    }
}

impl PlayerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn at_once(mut self, at_once: bool) -> Self {
        self.at_once = at_once;
        self
    }

    pub fn start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    pub fn time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale;
        self
    }

    pub fn advertise_sleep(mut self, sleep: Duration) -> Self {
        self.advertise_sleep = sleep;
        self
    }

    pub fn start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn bag_time_hz(mut self, hz: u32) -> Self {
        self.bag_time_hz = Some(hz);
        self
    }
}

/// Playback statistics.
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub messages_played: u64,
    pub messages_skipped: u64,
    pub topics_advertised: u64,
    /// Wall clock spent in `run`.
    pub duration: Duration,
    /// Whether playback finished while paused.
    pub ended_paused: bool,
}

/// Keyboard input abstraction; the interactive source lives in
/// [`crate::term`], tests script their own.
pub trait KeySource: Send {
    /// A pending key byte, or `None` when no input is available.
    fn poll(&mut self) -> Option<u8>;
}

/// Source for non-interactive runs; never yields a key.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeys;

impl KeySource for NoKeys {
    fn poll(&mut self) -> Option<u8> {
        None
    }
}

/// Bag player: republishes recorded envelopes through a node handle.
pub struct Player {
    bags: Vec<PathBuf>,
    options: PlayerOptions,
    keys: Box<dyn KeySource>,
}

impl Player {
    pub fn new(bags: Vec<PathBuf>, options: PlayerOptions) -> Result<Self, PlayError> {
        if options.time_scale <= 0.0 || !options.time_scale.is_finite() {
            return Err(PlayError::InvalidTimeScale(options.time_scale));
        }
        Ok(Self {
            bags,
            options,
            keys: Box::new(NoKeys),
        })
    }

    /// Replace the keyboard source (interactive terminal, scripted test
    /// input).
    pub fn with_keys(mut self, keys: Box<dyn KeySource>) -> Self {
        self.keys = keys;
        self
    }

    /// Play all bags to completion (or until the node shuts down) and
    /// return the statistics.
    pub fn run(&mut self, nh: &NodeHandle) -> Result<PlaybackStats, PlayError> {
        let mut readers = Vec::with_capacity(self.bags.len());
        for path in &self.bags {
            readers.push(BagReader::open(path)?);
        }
        let mut merged = MergedReader::new(readers)?;
        let mut stats = PlaybackStats::default();

        let Some(first_time) = merged.first_record_time_ns() else {
            tracing::info!("nothing to play");
            return Ok(stats);
        };
        let start_cutoff = first_time.saturating_add(self.options.start_offset.as_nanos() as u64);
        let scale = self.options.time_scale;

        let clock = match self.options.bag_time_hz {
            Some(hz) => Some(ClockPublisher::spawn(nh, hz, scale)?),
            None => None,
        };
        let mut clock_started = false;

        let wall_start = Instant::now();
        let mut shift = Duration::ZERO;
        let mut paused = self.options.start_paused;
        let mut paused_since = if paused { Some(Instant::now()) } else { None };
        let mut stepped = false;
        let mut publishers: HashMap<String, RawPublisher> = HashMap::new();
        let mut last_print: Option<Instant> = None;

        if !self.options.at_once {
            if paused {
                print!("Hit space to resume, or 's' to step.");
            } else {
                print!("Hit space to pause.");
            }
            let _ = std::io::stdout().flush();
        }

        'playback: while nh.ok() {
            let Some(envelope) = merged.next()? else {
                break;
            };
            if envelope.record_time_ns < start_cutoff {
                stats.messages_skipped += 1;
                continue;
            }

            if let Some(clock) = &clock {
                if !clock_started {
                    if paused {
                        clock.step_to(envelope.record_time_ns);
                    } else {
                        clock.start_at(envelope.record_time_ns);
                    }
                    clock_started = true;
                }
            }

            // Advertise each topic exactly once per run; the sleep gives
            // subscribers time to attach and is added to the shift so the
            // remaining schedule keeps the recorded gaps.
            if !publishers.contains_key(&envelope.topic) {
                if let Some(clock) = &clock {
                    clock.freeze();
                }
                let before = Instant::now();
                let publisher = nh.advertise_any(
                    &envelope.topic,
                    TypeDescriptor::new(&envelope.type_name, &envelope.md5sum),
                    self.options.queue_size.max(1),
                )?;
                tracing::info!(
                    "Sleeping {:.3} seconds after advertising {}...",
                    self.options.advertise_sleep.as_secs_f64(),
                    envelope.topic
                );
                std::thread::sleep(self.options.advertise_sleep);
                tracing::info!("Done sleeping.");
                shift += before.elapsed();
                publishers.insert(envelope.topic.clone(), publisher);
                stats.topics_advertised += 1;
                if let Some(clock) = &clock {
                    clock.start_at(envelope.record_time_ns);
                }
            }

            if self.options.at_once {
                if let Some(clock) = &clock {
                    clock.start_at(envelope.record_time_ns);
                }
                publish(&publishers, &envelope)?;
                stats.messages_played += 1;
                continue;
            }

            let offset = Duration::from_nanos(
                ((envelope.record_time_ns - first_time) as f64 / scale) as u64,
            );
            let mut play_time = wall_start + offset + shift;

            // Wait out the schedule, reacting to keys; pause freezes the
            // cursor here so no envelope is ever lost.
            loop {
                while let Some(key) = self.keys.poll() {
                    match key {
                        b' ' => {
                            paused = !paused;
                            if paused {
                                if let Some(clock) = &clock {
                                    clock.freeze();
                                }
                                paused_since = Some(Instant::now());
                                print!("\nHit space to resume, or 's' to step.");
                            } else {
                                if let Some(clock) = &clock {
                                    clock.start_at(envelope.record_time_ns);
                                }
                                let now = Instant::now();
                                let pause_shift = if stepped {
                                    stepped = false;
                                    now.saturating_duration_since(play_time)
                                } else {
                                    paused_since
                                        .take()
                                        .map(|since| now.saturating_duration_since(since))
                                        .unwrap_or_default()
                                };
                                shift += pause_shift;
                                play_time += pause_shift;
                                print!("\nHit space to pause.");
                            }
                            let _ = std::io::stdout().flush();
                        }
                        b's' if paused => {
                            // Emit exactly this envelope and stay paused.
                            stepped = true;
                            if let Some(clock) = &clock {
                                clock.step_to(envelope.record_time_ns);
                            }
                            publish(&publishers, &envelope)?;
                            stats.messages_played += 1;
                            self.print_progress(&mut last_print, &envelope, first_time);
                            continue 'playback;
                        }
                        _ => {}
                    }
                }

                if !nh.ok() {
                    break 'playback;
                }
                if paused {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                let now = Instant::now();
                let Some(delta) = play_time.checked_duration_since(now) else {
                    break;
                };
                if delta > Duration::from_micros(100) {
                    std::thread::sleep(delta.min(Duration::from_millis(100)));
                } else {
                    std::thread::sleep(delta.saturating_sub(Duration::from_micros(5)));
                    break;
                }
            }

            publish(&publishers, &envelope)?;
            stats.messages_played += 1;
            self.print_progress(&mut last_print, &envelope, first_time);
        }

        stats.duration = wall_start.elapsed();
        stats.ended_paused = paused;
        if !self.options.quiet {
            println!();
        }
        println!("Done.");
        Ok(stats)
    }

    /// Current-log-time line, at most every 100 ms.
    fn print_progress(
        &self,
        last_print: &mut Option<Instant>,
        envelope: &Envelope,
        first_time: u64,
    ) {
        if self.options.quiet {
            return;
        }
        let due = last_print.map_or(true, |t| t.elapsed() >= Duration::from_millis(100));
        if !due {
            return;
        }
        *last_print = Some(Instant::now());
        let time_secs = envelope.record_time_ns as f64 / 1e9;
        let duration_secs = (envelope.record_time_ns - first_time) as f64 / 1e9;
        print!("Time: {:16.6}    Duration: {:16.6}\r", time_secs, duration_secs);
        let _ = std::io::stdout().flush();
    }
}

fn publish(
    publishers: &HashMap<String, RawPublisher>,
    envelope: &Envelope,
) -> Result<(), PlayError> {
    if let Some(publisher) = publishers.get(&envelope.topic) {
        publisher.publish_bytes(&envelope.payload)?;
    }
    Ok(())
}
