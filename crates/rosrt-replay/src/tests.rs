// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replay scenarios against an in-memory master.
//!
//! The node runtime is a process singleton, so these tests serialize on a
//! shared lock and release every handle before the next scenario
//! re-initializes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tempfile::TempDir;

use rosrt::master::{Master, MemoryMaster};
use rosrt::msg::{Message, Text};
use rosrt::{InitOptions, NodeHandle};

use crate::bag::{BagWriter, Envelope};
use crate::player::{KeySource, PlayError, Player, PlayerOptions};

fn scenario_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock()
}

fn init_node(name: &str) -> Arc<MemoryMaster> {
    let master = Arc::new(MemoryMaster::new());
    rosrt::init_with_options(
        std::iter::empty::<String>(),
        name,
        InitOptions::default().master(Arc::clone(&master) as Arc<dyn Master>),
    )
    .expect("init");
    master
}

fn text_envelope(time_ns: u64, topic: &str, data: &str) -> Envelope {
    Envelope {
        record_time_ns: time_ns,
        topic: topic.to_string(),
        type_name: Text::type_name().to_string(),
        md5sum: Text::md5sum().to_string(),
        payload: rosrt::msg::encode_to_vec(&Text::new(data)).expect("encode"),
    }
}

/// Write a bag with `count` envelopes alternating between two topics,
/// `spacing_ns` apart, starting at `base_ns`.
fn two_topic_bag(dir: &TempDir, count: u64, base_ns: u64, spacing_ns: u64) -> PathBuf {
    let path = dir.path().join("two_topics.bag");
    let mut writer = BagWriter::create(&path).expect("create");
    for i in 0..count {
        let topic = if i % 2 == 0 { "/alpha" } else { "/beta" };
        writer
            .write(&text_envelope(base_ns + i * spacing_ns, topic, &i.to_string()))
            .expect("write");
    }
    writer.finalize().expect("finalize");
    path
}

/// Scripted keyboard input; requests node shutdown after the script is
/// exhausted and the player has idled for a while.
struct ScriptedKeys {
    keys: VecDeque<u8>,
    idle_polls: usize,
}

impl ScriptedKeys {
    fn new(keys: &[u8]) -> Box<Self> {
        Box::new(Self {
            keys: keys.iter().copied().collect(),
            idle_polls: 0,
        })
    }
}

impl KeySource for ScriptedKeys {
    fn poll(&mut self) -> Option<u8> {
        if let Some(key) = self.keys.pop_front() {
            return Some(key);
        }
        self.idle_polls += 1;
        if self.idle_polls > 30 {
            rosrt::request_shutdown();
        }
        None
    }
}

#[test]
fn rate_scaled_playback_matches_the_recorded_span() {
    let _lock = scenario_lock();
    let master = init_node("replay_rate");
    let nh = NodeHandle::new("").unwrap();

    // 100 envelopes over 990 ms recorded, rate 2.0 -> ~495 ms playback
    // plus two advertise sleeps of 10 ms.
    let dir = TempDir::new().unwrap();
    let bag = two_topic_bag(&dir, 100, 1_000_000, 10_000_000);

    let options = PlayerOptions::new()
        .quiet(true)
        .time_scale(2.0)
        .advertise_sleep(Duration::from_millis(10));
    let start = Instant::now();
    let stats = Player::new(vec![bag], options).unwrap().run(&nh).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(stats.messages_played, 100);
    assert_eq!(stats.topics_advertised, 2);
    assert!(!stats.ended_paused);
    assert!(
        elapsed >= Duration::from_millis(450),
        "finished too fast: {:?}",
        elapsed
    );
    assert!(
        elapsed <= Duration::from_millis(1500),
        "finished too slowly: {:?}",
        elapsed
    );

    // Each topic advertised exactly once per run.
    assert_eq!(master.publisher_registrations("/alpha"), 1);
    assert_eq!(master.publisher_registrations("/beta"), 1);
}

#[test]
fn all_at_once_mode_skips_the_schedule() {
    let _lock = scenario_lock();
    init_node("replay_at_once");
    let nh = NodeHandle::new("").unwrap();

    let dir = TempDir::new().unwrap();
    let bag = two_topic_bag(&dir, 100, 0, 10_000_000);

    let options = PlayerOptions::new()
        .quiet(true)
        .at_once(true)
        .advertise_sleep(Duration::from_millis(1));
    let start = Instant::now();
    let stats = Player::new(vec![bag], options).unwrap().run(&nh).unwrap();

    assert_eq!(stats.messages_played, 100);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn messages_are_republished_in_record_order() {
    let _lock = scenario_lock();
    init_node("replay_order");
    let nh = NodeHandle::new("").unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ordered.bag");
    let mut writer = BagWriter::create(&path).expect("create");
    for i in 0..20u64 {
        writer
            .write(&text_envelope(i * 1_000, "/ordered", &i.to_string()))
            .expect("write");
    }
    writer.finalize().expect("finalize");

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    let _sub = nh
        .subscribe::<Text, _>("/ordered", 32, move |msg| {
            log.lock().push(msg.data.clone());
        })
        .unwrap();

    let options = PlayerOptions::new()
        .quiet(true)
        .at_once(true)
        .advertise_sleep(Duration::from_millis(1));
    Player::new(vec![path], options)
        .unwrap()
        .run(&nh)
        .unwrap();
    rosrt::spin_once();

    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(*received.lock(), expected);
}

#[test]
fn paused_start_with_three_steps_emits_exactly_three() {
    let _lock = scenario_lock();
    init_node("replay_steps");
    let nh = NodeHandle::new("").unwrap();

    let dir = TempDir::new().unwrap();
    let bag = two_topic_bag(&dir, 10, 0, 50_000_000);

    let options = PlayerOptions::new()
        .quiet(true)
        .start_paused(true)
        .advertise_sleep(Duration::from_millis(1));
    let stats = Player::new(vec![bag], options)
        .unwrap()
        .with_keys(ScriptedKeys::new(b"sss"))
        .run(&nh)
        .unwrap();

    assert_eq!(stats.messages_played, 3);
    assert!(stats.ended_paused);
}

#[test]
fn start_offset_drops_the_head_of_the_recording() {
    let _lock = scenario_lock();
    init_node("replay_offset");
    let nh = NodeHandle::new("").unwrap();

    // 10 envelopes 100 ms apart; a 450 ms offset skips the first five.
    let dir = TempDir::new().unwrap();
    let bag = two_topic_bag(&dir, 10, 0, 100_000_000);

    let options = PlayerOptions::new()
        .quiet(true)
        .at_once(true)
        .advertise_sleep(Duration::from_millis(1))
        .start_offset(Duration::from_millis(450));
    let stats = Player::new(vec![bag], options).unwrap().run(&nh).unwrap();

    assert_eq!(stats.messages_skipped, 5);
    assert_eq!(stats.messages_played, 5);
}

#[test]
fn bag_clock_is_published_while_playing() {
    let _lock = scenario_lock();
    init_node("replay_clock");
    let nh = NodeHandle::new("").unwrap();

    let samples = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = Arc::clone(&samples);
    let _sub = nh
        .subscribe::<rosrt::msg::Clock, _>("/time", 64, move |_msg| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let dir = TempDir::new().unwrap();
    let bag = two_topic_bag(&dir, 20, 0, 20_000_000);

    let options = PlayerOptions::new()
        .quiet(true)
        .bag_time_hz(100)
        .advertise_sleep(Duration::from_millis(1));
    Player::new(vec![bag], options).unwrap().run(&nh).unwrap();
    rosrt::spin_once();

    assert!(samples.load(Ordering::SeqCst) > 0, "no clock samples seen");
}

#[test]
fn invalid_time_scale_is_rejected() {
    let zero = Player::new(vec![PathBuf::from("x.bag")], PlayerOptions::new().time_scale(0.0));
    assert!(matches!(zero, Err(PlayError::InvalidTimeScale(_))));
    let negative =
        Player::new(vec![PathBuf::from("x.bag")], PlayerOptions::new().time_scale(-2.0));
    assert!(matches!(negative, Err(PlayError::InvalidTimeScale(_))));
}

#[test]
fn missing_bag_fails_the_run() {
    let _lock = scenario_lock();
    init_node("replay_missing");
    let nh = NodeHandle::new("").unwrap();

    let mut player = Player::new(
        vec![PathBuf::from("/nonexistent/capture.bag")],
        PlayerOptions::new().quiet(true),
    )
    .unwrap();
    assert!(matches!(player.run(&nh), Err(PlayError::Bag(_))));
}
