// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rosrt-replay - recorded-stream capture format and replay
//!
//! Bags are ordered logs of timestamped messages. This crate reads and
//! writes the bag format and replays recorded streams through a
//! [`rosrt::NodeHandle`] with rate scaling, pause/step control, a
//! start-offset skip, and optional synthetic-clock publication. The
//! `rosplay` binary wraps it as a command-line tool; check mode inspects
//! a bag without creating a node.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rosrt_replay::player::{Player, PlayerOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! rosrt::init(std::env::args().skip(1), "replay")?;
//! let nh = rosrt::NodeHandle::new("")?;
//!
//! let options = PlayerOptions::new().time_scale(2.0);
//! let stats = Player::new(vec!["capture.bag".into()], options)?.run(&nh)?;
//! println!("played {} messages", stats.messages_played);
//! # Ok(())
//! # }
//! ```

/// Bag file reading, writing, and multi-bag merging.
pub mod bag;
/// Check mode: per-topic summary of a bag, no node involved.
pub mod check;
/// Synthetic bag-clock publication (`/time`).
pub mod clock;
/// The time-warped replay scheduler.
pub mod player;
/// Terminal raw-mode guard and key polling for interactive playback.
#[cfg(unix)]
pub mod term;

pub use bag::{BagError, BagHeader, BagReader, BagWriter, Envelope, MergedReader};
pub use check::{check_bag, BagSummary, TopicSummary};
pub use player::{KeySource, NoKeys, PlaybackStats, PlayError, Player, PlayerOptions};

#[cfg(test)]
mod tests;
