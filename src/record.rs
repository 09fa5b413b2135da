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
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, info, span, warn, Level};

use crate::device;
use crate::format::{bytes_for_duration, SampleFormat, StreamFormat, BUFFER_COUNT};
use crate::playsync::StopHandle;
use crate::pool::{BufferPool, PacketBuffer};
use crate::queue::InputQueue;
use crate::sink::{FileEncoding, WavSink};
use crate::util;

/// Seconds of audio per pool buffer while recording.
const RECORD_BUFFER_SECONDS: f64 = 0.5;

/// How long to wait for the input stream to report it is running.
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the pump naps when the capture ring is empty.
const RING_EMPTY_BACKOFF: Duration = Duration::from_micros(500);

/// How long the pump waits for a free buffer before re-checking for stop.
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Options for the record operation.
pub struct RecordOptions {
    /// Number of channels to capture.
    pub channels: u16,
    /// Sample encoding of the output file.
    pub encoding: FileEncoding,
    /// Capture sample rate. None uses the input device's default.
    pub sample_rate: Option<u32>,
    /// Stop recording after this long. None records until return is pressed.
    pub duration: Option<Duration>,
    /// Input device name. None uses the system default.
    pub device: Option<String>,
}

impl Default for RecordOptions {
    fn default() -> RecordOptions {
        RecordOptions {
            channels: 2,
            encoding: FileEncoding::default(),
            sample_rate: None,
            duration: None,
            device: None,
        }
    }
}

/// The format of the capture stream as staged in pool buffers: interleaved
/// f32 frames, one frame per packet.
fn capture_format(channels: u16, sample_rate: u32) -> StreamFormat {
    let bytes_per_frame = u32::from(channels) * (std::mem::size_of::<f32>() as u32);
    StreamFormat {
        codec_name: "pcm_f32le".to_string(),
        sample_rate,
        channels,
        layout: None,
        sample_format: SampleFormat::Float,
        bits_per_sample: 32,
        frames_per_packet: 1,
        bytes_per_packet: Some(bytes_per_frame),
        max_packet_size: bytes_per_frame,
        magic_cookie: None,
        n_frames: None,
        delay: 0,
        padding: 0,
    }
}

/// Records from an input device to a WAV file through the buffer pool
/// pipeline.
pub fn record(path: &Path, options: RecordOptions) -> Result<(), Box<dyn Error>> {
    let span = span!(Level::INFO, "record", file = util::filename_display(path));
    let _enter = span.enter();

    let input = device::input(options.device.as_deref())?;
    if input.max_channels() < options.channels {
        return Err(format!(
            "{} channels required, audio device {} only has {}",
            options.channels,
            input.name(),
            input.max_channels()
        )
        .into());
    }
    let sample_rate = options
        .sample_rate
        .unwrap_or_else(|| input.default_sample_rate());

    let mut sink = WavSink::create(path, options.channels, sample_rate, options.encoding)?;
    let format = capture_format(options.channels, sample_rate);
    sink.apply_magic_cookie(format.magic_cookie.as_deref());

    info!(
        device = input.name(),
        channels = options.channels,
        sample_rate,
        "Recording from device"
    );

    let (buffer_size, _) = bytes_for_duration(&format, RECORD_BUFFER_SECONDS);
    debug!(buffer_size, "Sized pool buffers for recording");

    let pool = BufferPool::new(BUFFER_COUNT, buffer_size as usize);
    let recycler = pool.recycler();
    let (full_tx, full_rx) = bounded::<PacketBuffer>(BUFFER_COUNT);

    let stop = StopHandle::new();
    let queue = InputQueue::new(&input, options.channels, sample_rate)?;
    let consumer = queue.consumer();
    let channels = options.channels as usize;

    // The pump drains the capture ring into pool buffers and hands full
    // buffers to the writer.
    let pump_thread = {
        let pump_stop = stop.clone();
        thread::spawn(move || -> Result<(), String> {
            let mut scratch = vec![0.0f32; 4096 * channels];
            let mut frames_seen = 0u64;
            let mut current: Option<PacketBuffer> = None;

            loop {
                let n = consumer.pop(&mut scratch);
                if n == 0 {
                    if pump_stop.is_stopped() {
                        break;
                    }
                    spin_sleep::sleep(RING_EMPTY_BACKOFF);
                    continue;
                }

                let mut offset = 0usize;
                while offset < n {
                    let mut buffer = match current.take() {
                        Some(buffer) => buffer,
                        None => loop {
                            match pool.acquire_timeout(POOL_ACQUIRE_TIMEOUT) {
                                Some(buffer) => break buffer,
                                None => {
                                    if pump_stop.is_stopped() {
                                        return Ok(());
                                    }
                                }
                            }
                        },
                    };

                    let room_bytes = buffer.capacity() - buffer.len();
                    let room_samples = room_bytes / std::mem::size_of::<f32>();
                    let take = room_samples.min(n - offset);
                    let frames = (take / channels) as u64;
                    buffer.push_samples(&scratch[offset..offset + take], frames_seen);
                    frames_seen += frames;
                    offset += take;

                    if buffer.capacity() - buffer.len() < channels * std::mem::size_of::<f32>() {
                        if full_tx.send(buffer).is_err() {
                            return Ok(());
                        }
                    } else {
                        current = Some(buffer);
                    }
                }
            }

            // Flush the partial buffer on stop.
            if let Some(buffer) = current.take() {
                if !buffer.is_empty() {
                    let _ = full_tx.send(buffer);
                }
            }
            drop(full_tx);
            Ok(())
        })
    };

    // The writer converts staged f32 frames to the file encoding.
    let writer_thread = {
        let writer_recycler = recycler;
        thread::spawn(move || -> Result<u64, String> {
            for buffer in full_rx.iter() {
                let samples: Vec<f32> = buffer.samples().collect();
                sink.write(&samples).map_err(|e| e.to_string())?;
                writer_recycler.release(buffer);
            }
            // Codecs may finalize their cookie at the end of a session, so
            // it is applied once more before closing the file.
            sink.apply_magic_cookie(None);
            sink.finalize().map_err(|e| e.to_string())?;
            Ok(sink.frames_written())
        })
    };

    queue.start()?;

    // Wait for the stream to report it is running before starting the clock.
    let started = Instant::now();
    while !queue.is_running() {
        if started.elapsed() >= START_TIMEOUT {
            stop.stop();
            let _ = pump_thread.join();
            let _ = writer_thread.join();
            return Err("Timeout waiting for the queue to start".into());
        }
        spin_sleep::sleep(Duration::from_millis(10));
    }

    match options.duration {
        Some(duration) => {
            println!(
                "Recording to {} for {}",
                util::filename_display(path),
                util::duration_minutes_seconds(duration)
            );
            stop.wait_timeout(Arc::new(AtomicBool::new(false)), duration);
        }
        None => {
            println!(
                "Recording to {}, press return to stop",
                util::filename_display(path)
            );
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
        }
    }
    stop.stop();

    pump_thread
        .join()
        .map_err(|_| "pump thread panicked")?
        .map_err(|e| -> Box<dyn Error> { e.into() })?;
    let frames = writer_thread
        .join()
        .map_err(|_| "writer thread panicked")?
        .map_err(|e| -> Box<dyn Error> { e.into() })?;

    let dropped = queue.dropped_samples();
    if dropped > 0 {
        warn!(dropped, "Capture overran the pump, samples were dropped");
    }

    println!("Recorded {} frames to {}", frames, util::filename_display(path));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::capture_format;
    use crate::format::bytes_for_duration;

    #[test]
    fn test_capture_format_is_cbr() {
        let format = capture_format(2, 44100);
        assert!(!format.is_vbr());
        assert_eq!(format.bytes_per_packet, Some(8));
        assert_eq!(format.max_packet_size, 8);
    }

    #[test]
    fn test_capture_buffer_sizing() {
        // Half a second of stereo f32 at 44.1kHz is ~176KB, clamped to the
        // 64KiB ceiling.
        let format = capture_format(2, 44100);
        let (size, packets) = bytes_for_duration(&format, 0.5);
        assert_eq!(size, 0x10000);
        assert_eq!(packets, 0x10000 / 8);
    }
}
