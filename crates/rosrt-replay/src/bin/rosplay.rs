// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rosplay - replay recorded message streams.
//!
//! Usage:
//!   rosplay capture.bag
//!   rosplay -r 2.0 capture.bag other.bag
//!   rosplay -c capture.bag

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use rosrt_replay::check::check_bag;
use rosrt_replay::player::{Player, PlayerOptions};

#[derive(Parser, Debug)]
#[command(name = "rosplay")]
#[command(about = "Replay recorded message streams")]
#[command(version)]
struct Args {
    /// disable display of current log time
    #[arg(short = 'n')]
    no_time_display: bool,

    /// check the contents of the bag without playing back
    #[arg(short = 'c')]
    check: bool,

    /// playback all messages without waiting
    #[arg(short = 'a')]
    at_once: bool,

    /// publish the bag time at frequency <HZ>
    #[arg(short = 'b', value_name = "HZ")]
    bag_time_hz: Option<u32>,

    /// start in paused mode
    #[arg(short = 'p')]
    paused: bool,

    /// increase the publish rate by a factor <rate_change>
    #[arg(short = 'r', value_name = "SCALE")]
    rate: Option<f64>,

    /// sleep <SEC> seconds after every advertise call (to allow
    /// subscribers to connect)
    #[arg(short = 's', value_name = "SEC")]
    advertise_sleep: Option<f64>,

    /// start <SEC> seconds into the files
    #[arg(short = 't', value_name = "SEC")]
    start_offset: Option<f64>,

    /// use an outgoing queue of size <SIZE> (defaults to 0)
    #[arg(short = 'q', value_name = "SIZE")]
    queue_size: Option<usize>,

    /// bag files to play back from
    #[arg(required = true, value_name = "BAG")]
    bags: Vec<PathBuf>,

    /// log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();

    // Graph remapping arguments (`from:=to`, `__master:=URI`, ...) pass
    // through to init; clap collects them as bag paths.
    let remap_args: Vec<String> = args
        .bags
        .iter()
        .filter_map(|b| b.to_str())
        .filter(|b| b.contains(":="))
        .map(str::to_string)
        .collect();
    args.bags
        .retain(|b| !b.to_str().is_some_and(|s| s.contains(":=")));
    if args.bags.is_empty() {
        anyhow::bail!("You must specify at least one bagfile to play from.");
    }

    let level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    if args.check {
        return check_mode(&args);
    }

    if args.bag_time_hz.is_some() && args.bags.len() > 1 {
        anyhow::bail!("You can only play one single bag when using bag time [-b].");
    }

    let mut options = PlayerOptions::new()
        .quiet(args.no_time_display)
        .at_once(args.at_once)
        .start_paused(args.paused);
    if let Some(rate) = args.rate {
        options = options.time_scale(rate);
    }
    if let Some(secs) = args.advertise_sleep {
        options = options.advertise_sleep(Duration::from_secs_f64(secs));
    }
    if let Some(secs) = args.start_offset {
        options = options.start_offset(Duration::from_secs_f64(secs));
    }
    if let Some(size) = args.queue_size {
        options = options.queue_size(size);
    }
    if let Some(hz) = args.bag_time_hz {
        options = options.bag_time_hz(hz);
    }

    rosrt::init_with_options(
        remap_args,
        "rosplay",
        rosrt::InitOptions::default().anonymous(true),
    )?;
    let nh = rosrt::NodeHandle::new("")?;

    ctrlc::set_handler(rosrt::request_shutdown)?;

    let mut player = Player::new(args.bags, options)?;
    if !args.at_once {
        #[cfg(unix)]
        match rosrt_replay::term::TerminalKeys::new() {
            Ok(keys) => player = player.with_keys(Box::new(keys)),
            Err(e) => tracing::debug!("keyboard control disabled: {}", e),
        }
    }

    let stats = player.run(&nh)?;
    tracing::info!(
        "played {} messages over {:.1}s ({} skipped)",
        stats.messages_played,
        stats.duration.as_secs_f64(),
        stats.messages_skipped
    );

    // Let outbound links drain before the node unwinds.
    std::thread::sleep(Duration::from_secs(1));
    Ok(())
}

/// `-c`: scan one bag and print its summary; no node is created and no
/// message is published.
fn check_mode(args: &Args) -> anyhow::Result<()> {
    if args.at_once {
        anyhow::bail!("Option -a is not valid when checking bag");
    }
    if args.paused {
        anyhow::bail!("Option -p is not valid when checking bag");
    }
    if args.start_offset.is_some() {
        anyhow::bail!("Option -t is not valid when checking bag");
    }
    if args.queue_size.is_some() {
        anyhow::bail!("Option -q is not valid when checking bag");
    }
    if args.bags.len() > 1 {
        anyhow::bail!("Only 1 bag can be checked at a time");
    }

    let summary = check_bag(&args.bags[0])?;
    print!("{}", summary);
    Ok(())
}
