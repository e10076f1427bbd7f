// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Plays a static buffer with a loop region through a control block.
//!
//! The client fills the whole ring once and configures a loop. The server
//! side then consumes it period by period the way a mixer would, until the
//! loop is exhausted and the tail has been played.
//!
//! ```text
//! cargo run --example looped_playback -- --frames 4800 --loop-start 1200 --loop-end 3600 --loops 3
//! ```

mod common;

use std::time::Duration;

use clap::Parser;
use mxl_transport::{
    ClientProxy, ControlBlock, Direction, Error, LOOP_FOREVER, NO_LOOP, ServerProxy,
    TransportConfig,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Opts {
    /// Optional JSON configuration for the lock schedule.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Ring size in frames.
    #[arg(long, default_value_t = 4800)]
    frames: u32,

    /// First frame of the loop region.
    #[arg(long, default_value_t = 1200)]
    loop_start: u32,

    /// Frame after the last frame of the loop region.
    #[arg(long, default_value_t = 3600)]
    loop_end: u32,

    /// Number of repetitions (-1 loops until interrupted).
    #[arg(long, default_value_t = 3, allow_negative_numbers = true)]
    loops: i32,

    /// Frames consumed per server period.
    #[arg(long, default_value_t = 480)]
    period: u32,

    /// Sample rate used to pace the server.
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,
}

fn main() -> Result<(), Error> {
    common::setup_logging();
    let opts = Opts::parse();
    let config = match &opts.config {
        Some(path) => TransportConfig::from_json_file(path)?,
        None => TransportConfig::default(),
    };
    if opts.frames == 0 || opts.period == 0 || opts.sample_rate == 0 {
        return Err(Error::InvalidArg);
    }

    let cblk = ControlBlock::new(opts.frames);
    let client = ClientProxy::new(&cblk, Direction::Playback, config.lock);
    client.set_sample_rate(opts.sample_rate);

    // One mono ramp, written through the client cursor.
    let mut ring = vec![0i16; opts.frames as usize];
    while client.frames_available()? > 0 {
        let region = client.obtain_buffer(opts.frames, Some(Duration::from_millis(10)))?;
        for (i, sample) in ring[region.offset as usize..][..region.frames as usize]
            .iter_mut()
            .enumerate()
        {
            *sample = ((region.position as usize + i) % i16::MAX as usize) as i16;
        }
        client.release_buffer(region.frames);
    }
    client.set_loop(opts.loop_start, opts.loop_end, opts.loops)?;
    info!(
        "Ring of {} frames filled, looping {}..{} {} times",
        opts.frames,
        opts.loop_start,
        opts.loop_end,
        if opts.loops == LOOP_FOREVER {
            "forever".to_string()
        } else {
            opts.loops.to_string()
        }
    );

    let period = Duration::from_secs_f64(opts.period as f64 / opts.sample_rate as f64);
    let mut server = ServerProxy::new(&cblk, Direction::Playback, config.lock);
    let mut played = 0u64;
    let mut checksum = 0i64;
    loop {
        let region = server.get_next_buffer(opts.period);
        if region.is_empty() {
            if server.is_underrun() {
                info!("Playback finished after {} frames", played);
                break;
            }
            std::thread::sleep(period);
            continue;
        }
        checksum += ring[region.offset as usize..][..region.frames as usize]
            .iter()
            .map(|sample| *sample as i64)
            .sum::<i64>();
        match server.release_buffer(region.frames) {
            Ok(step) if step.looped => info!(
                "Looped back to {} ({} repetitions left)",
                step.position,
                cblk.loop_count()
            ),
            Ok(_) => {}
            Err(err) => warn!("Server step deferred: {}", err),
        }
        played += region.frames as u64;
        std::thread::sleep(period);
    }

    if cblk.loop_end() != NO_LOOP {
        warn!("Loop region still armed at {}", cblk.loop_end());
    }
    info!("Played {} frames, checksum {}", played, checksum);
    Ok(())
}
