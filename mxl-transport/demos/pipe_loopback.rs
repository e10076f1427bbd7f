// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Streams a sine tone through a throttled pipe to a reader thread and
//! reports the reader's timestamps on the writer side.
//!
//! ```text
//! cargo run --example pipe_loopback -- --seconds 2 --frames 960
//! ```

mod common;

use std::time::Duration;

use clap::Parser;
use mxl_transport::{
    AudioTimestamp, Format, MonoPipe, Port, SampleFormat, Sink, Source, TransportConfig,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Opts {
    /// Optional JSON configuration; its `pipe` section replaces the flags below.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Requested pipe capacity in frames.
    #[arg(long, default_value_t = 960)]
    frames: usize,

    /// Sample rate of the stream.
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Tone frequency in Hz.
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,

    /// How long to stream.
    #[arg(long, default_value_t = 2)]
    seconds: u64,

    /// Frames handed to each write.
    #[arg(long, default_value_t = 480)]
    chunk: usize,
}

fn main() -> Result<(), mxl_transport::Error> {
    common::setup_logging();
    let opts = Opts::parse();

    let mut pipe = match &opts.config {
        Some(path) => match TransportConfig::from_json_file(path)? {
            TransportConfig {
                pipe: Some(pipe_config),
                poll_tries,
                ..
            } => MonoPipe::from_config(&pipe_config)?.with_poll_tries(poll_tries),
            _ => {
                return Err(mxl_transport::Error::Other(format!(
                    "{} has no pipe section",
                    path.display()
                )));
            }
        },
        None => MonoPipe::new(
            opts.frames,
            Format::new(opts.sample_rate, 1, SampleFormat::F32),
            true,
        )?,
    };
    let format = pipe.format();
    let mut reader = pipe.reader()?;
    pipe.negotiate(&[format])?;
    reader.negotiate(&[format])?;

    let total = format.duration_to_frames(Duration::from_secs(opts.seconds)) as usize;
    let chunk = opts.chunk.max(1);
    let frame_size = format.frame_size();
    info!(
        "Streaming {} frames of {:?} through a {} frame pipe",
        total,
        format,
        pipe.max_frames()
    );

    std::thread::scope(|scope| -> Result<(), mxl_transport::Error> {
        let drain = scope.spawn(move || -> Result<u64, mxl_transport::Error> {
            let mut buffer = vec![0u8; chunk * frame_size];
            let mut peak = 0f32;
            while (reader.frames_read() as usize) < total {
                let read = reader.read(&mut buffer, chunk)?;
                if read == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                if format.sample_format == SampleFormat::F32 {
                    for sample in buffer[..read * frame_size].chunks_exact(4) {
                        let value = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                        peak = peak.max(value.abs());
                    }
                }
                // Emulate a device period.
                std::thread::sleep(format.frames_to_duration(read as u64));
            }
            info!("Reader drained {} frames, peak {:.3}", reader.frames_read(), peak);
            Ok(reader.frames_read())
        });

        let mut buffer = vec![0u8; chunk * frame_size];
        let mut written = 0usize;
        let mut timestamp = AudioTimestamp::default();
        let step = opts.frequency * std::f32::consts::TAU / format.sample_rate as f32;
        while written < total {
            let count = chunk.min(total - written);
            for (i, frame) in buffer[..count * frame_size].chunks_exact_mut(frame_size).enumerate() {
                let value = ((written + i) as f32 * step).sin() * 0.5;
                let bytes = value.to_le_bytes();
                for (dst, src) in frame.iter_mut().zip(bytes.iter().cycle()) {
                    *dst = *src;
                }
            }
            written += pipe.write(&buffer[..count * frame_size], count)?;
            if pipe.poll_timestamp(&mut timestamp) {
                info!(
                    "Reader at frame {} ({:.3} s), writer at {}",
                    timestamp.position,
                    timestamp.time_ns as f64 / 1e9,
                    written
                );
            }
        }

        let drained = drain
            .join()
            .map_err(|_| mxl_transport::Error::Other("reader thread panicked".to_string()))??;
        info!("Done: wrote {}, drained {}", pipe.frames_written(), drained);
        Ok(())
    })
}
