// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, error, info, span, Level};

use crate::device;
use crate::format::{bytes_for_duration, BUFFER_COUNT};
use crate::playsync::StopHandle;
use crate::pool::{BufferPool, PacketBuffer};
use crate::queue::OutputQueue;
use crate::rate::{Quality, RateConverter};
use crate::source::PacketSource;
use crate::util;

/// Seconds of audio per pool buffer during playback.
const PLAY_BUFFER_SECONDS: f64 = 0.5;

/// How often the wait loop checks whether playback has finished.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long the pump waits for a free buffer before re-checking for stop.
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Options for the play operation.
pub struct PlayOptions {
    /// Playback gain applied in the decoded f32 domain.
    pub volume: f32,
    /// Stop playback after this long even if the file has more audio.
    pub time_limit: Option<Duration>,
    /// Playback rate. 1.0 plays at normal speed and bypasses resampling.
    pub rate: f64,
    /// Resampling quality for rates other than 1.0.
    pub quality: Quality,
    /// Output device name. None uses the system default.
    pub device: Option<String>,
    /// Print the resolved stream format before playing.
    pub show_format: bool,
}

impl Default for PlayOptions {
    fn default() -> PlayOptions {
        PlayOptions {
            volume: 1.0,
            time_limit: None,
            rate: 1.0,
            quality: Quality::default(),
            device: None,
            show_format: false,
        }
    }
}

/// Plays an audio file to an output device through the buffer pool pipeline.
pub fn play(path: &Path, options: PlayOptions) -> Result<(), Box<dyn Error>> {
    let span = span!(Level::INFO, "play", file = util::filename_display(path));
    let _enter = span.enter();

    let mut source = PacketSource::open(path)?;
    let format = source.stream_format().clone();

    if options.show_format {
        println!("{}: {}", util::filename_display(path), format);
    }
    info!(
        format = %format,
        volume = options.volume,
        rate = options.rate,
        "Playing file"
    );

    let (buffer_size, packets_per_read) = bytes_for_duration(&format, PLAY_BUFFER_SECONDS);
    debug!(
        buffer_size,
        packets_per_read, "Sized pool buffers for playback"
    );

    let pool = BufferPool::new(BUFFER_COUNT, buffer_size as usize);
    let recycler = pool.recycler();
    let (filled_tx, filled_rx) = bounded::<PacketBuffer>(BUFFER_COUNT);

    // Prime every pool buffer before the queue starts. A short file may hit
    // EOF during priming, in which case fewer buffers circulate.
    let mut primed_eof = false;
    for _ in 0..BUFFER_COUNT {
        let mut buffer = match pool.try_acquire() {
            Some(buffer) => buffer,
            None => break,
        };
        let packets = source.read_packets(&mut buffer, packets_per_read)?;
        if packets == 0 {
            recycler.release(buffer);
            primed_eof = true;
            break;
        }
        filled_tx
            .send(buffer)
            .map_err(|e| format!("error priming buffer: {}", e))?;
    }

    let stop = StopHandle::new();
    let output = device::output(options.device.as_deref())?;
    let queue = OutputQueue::new(&output, &format, stop.clone())?;
    let producer = queue.producer();
    let finished = queue.finished_flag();

    let mut decoder = source.make_decoder()?;
    let mut converter = RateConverter::new(format.channels, options.rate, options.quality)?;
    let volume = options.volume;

    // The pump refills buffers as they come back from the decoder.
    let pump_thread = {
        let pump_stop = stop.clone();
        thread::spawn(move || -> Result<(), String> {
            if primed_eof {
                drop(filled_tx);
                return Ok(());
            }
            loop {
                let mut buffer = match pool.acquire_timeout(POOL_ACQUIRE_TIMEOUT) {
                    Some(buffer) => buffer,
                    None => {
                        if pump_stop.is_stopped() {
                            return Ok(());
                        }
                        continue;
                    }
                };
                let packets = source
                    .read_packets(&mut buffer, packets_per_read)
                    .map_err(|e| e.to_string())?;
                if packets == 0 {
                    debug!("Reached end of file");
                    drop(filled_tx);
                    return Ok(());
                }
                if filled_tx.send(buffer).is_err() {
                    return Ok(());
                }
            }
        })
    };

    // The decode thread drains filled buffers into the output ring.
    let decode_thread = {
        let decode_recycler = recycler;
        thread::spawn(move || -> Result<(), String> {
            let mut decoded: Vec<f32> = Vec::new();
            let mut converted: Vec<f32> = Vec::new();
            for buffer in filled_rx.iter() {
                decoded.clear();
                converted.clear();
                decoder
                    .decode_buffer(&buffer, &mut decoded)
                    .map_err(|e| e.to_string())?;
                decode_recycler.release(buffer);

                if volume != 1.0 {
                    for sample in decoded.iter_mut() {
                        *sample *= volume;
                    }
                }
                converter
                    .process(&decoded, &mut converted)
                    .map_err(|e| e.to_string())?;
                if !producer.push(&converted) {
                    return Ok(());
                }
            }

            converted.clear();
            converter.flush(&mut converted).map_err(|e| e.to_string())?;
            producer.push(&converted);
            producer.mark_end_of_stream();
            Ok(())
        })
    };

    queue.start()?;

    if let Some(duration) = format.duration() {
        println!(
            "Playing {} ({})",
            util::filename_display(path),
            util::duration_minutes_seconds(duration)
        );
    } else {
        println!("Playing {}", util::filename_display(path));
    }

    match options.time_limit {
        // With a time limit, poll so the limit is honored even if nothing
        // ever notifies.
        Some(limit) => {
            let started = Instant::now();
            loop {
                if finished.load(Ordering::Relaxed) || stop.is_stopped() {
                    break;
                }
                if started.elapsed() >= limit {
                    info!(limit = ?limit, "Time limit reached, stopping playback");
                    stop.stop();
                    break;
                }
                spin_sleep::sleep(WAIT_POLL_INTERVAL);
            }
        }
        None => stop.wait(finished.clone()),
    }

    stop.stop();
    let mut result: Result<(), Box<dyn Error>> = Ok(());
    for (name, handle) in [("pump", pump_thread), ("decode", decode_thread)] {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(err = e, thread = name, "Playback thread failed");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
            Err(_) => {
                if result.is_ok() {
                    result = Err(format!("{} thread panicked", name).into());
                }
            }
        }
    }

    result
}
