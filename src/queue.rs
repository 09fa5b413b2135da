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
use std::cell::UnsafeCell;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Sample;
use tracing::error;

use crate::device::{InputDevice, OutputDevice};
use crate::format::StreamFormat;
use crate::playsync::StopHandle;
use crate::priority::CallbackPriority;

/// How much decoded audio the ring between the pump side and the device
/// callback holds, as a fraction of a second (100 ms).
const RING_SECONDS_DIVISOR: usize = 10;

/// How long the producer side naps when the ring has no room.
const RING_FULL_BACKOFF: Duration = Duration::from_micros(500);

/// Lock-free single-producer single-consumer ring for f32 samples sitting
/// between the pump and the device callback. The callback side never blocks:
/// reads that come up short are zero-filled by the caller, writes that come
/// up short report how much was taken. Transfers move whole interleaved
/// frames only, so a short read or write can never split a frame and shift
/// later samples into the wrong channel slots.
pub struct SampleRing {
    /// Backing cells. UnsafeCell because the producer writes while the
    /// consumer reads; the positions below keep their ranges disjoint.
    cells: Box<[UnsafeCell<f32>]>,
    /// Capacity (always a power of 2).
    capacity: usize,
    /// Samples per interleaved frame. Reads and writes are rounded down to a
    /// multiple of this.
    frame: usize,
    /// Read position (consumer).
    read_pos: AtomicUsize,
    /// Write position (producer).
    write_pos: AtomicUsize,
}

// One producer and one consumer each touch disjoint index ranges guarded by
// the Acquire/Release position loads.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    pub fn new(capacity: usize, channels: u16) -> SampleRing {
        // Round up to a power of 2 for cheap modulo.
        let capacity = capacity.next_power_of_two();
        let cells = (0..capacity)
            .map(|_| UnsafeCell::new(0.0f32))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        SampleRing {
            cells,
            capacity,
            frame: channels.max(1) as usize,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    /// Number of samples available to read.
    #[inline]
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    /// Space available to write.
    #[inline]
    pub fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Writes samples into the ring, whole frames only. Returns the number
    /// actually written.
    pub fn write(&self, samples: &[f32]) -> usize {
        let space = self.space();
        let to_write = space.min(samples.len());
        let to_write = to_write - to_write % self.frame;
        if to_write == 0 {
            return 0;
        }
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        // One or two chunks depending on wrap-around.
        let first_chunk = (self.capacity - write).min(to_write);
        unsafe {
            std::ptr::copy_nonoverlapping(samples.as_ptr(), self.cells[write].get(), first_chunk);
            if to_write > first_chunk {
                std::ptr::copy_nonoverlapping(
                    samples.as_ptr().add(first_chunk),
                    self.cells[0].get(),
                    to_write - first_chunk,
                );
            }
        }

        self.write_pos
            .store((write + to_write) & mask, Ordering::Release);
        to_write
    }

    /// Reads samples from the ring, whole frames only. Returns the number
    /// actually read.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let available = self.available();
        let to_read = available.min(output.len());
        let to_read = to_read - to_read % self.frame;
        if to_read == 0 {
            return 0;
        }
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        let first_chunk = (self.capacity - read).min(to_read);
        unsafe {
            std::ptr::copy_nonoverlapping(self.cells[read].get(), output.as_mut_ptr(), first_chunk);
            if to_read > first_chunk {
                std::ptr::copy_nonoverlapping(
                    self.cells[0].get(),
                    output.as_mut_ptr().add(first_chunk),
                    to_read - first_chunk,
                );
            }
        }

        self.read_pos
            .store((read + to_read) & mask, Ordering::Release);
        to_read
    }
}

fn ring_for_format(format: &StreamFormat) -> Arc<SampleRing> {
    let capacity =
        (format.sample_rate as usize * format.channels as usize) / RING_SECONDS_DIVISOR;
    Arc::new(SampleRing::new(capacity.max(1024), format.channels))
}

/// Shared state for the output callback.
struct OutputShared {
    ring: Arc<SampleRing>,
    /// Set by the pump side once the last decoded samples are in the ring.
    end_of_stream: Arc<AtomicBool>,
    /// Set by the callback once the ring has drained after end of stream.
    finished: Arc<AtomicBool>,
    stop: StopHandle,
}

impl OutputShared {
    /// Drains the ring into the callback's buffer, zero-filling any
    /// shortfall, and flips the finished flag once a drained ring follows the
    /// end of the stream.
    fn fill(&self, data: &mut [f32]) {
        let read = self.ring.read(data);
        data[read..].fill(0.0);
        if self.end_of_stream.load(Ordering::Relaxed)
            && self.ring.available() == 0
            && !self.finished.swap(true, Ordering::Relaxed)
        {
            self.stop.notify();
        }
    }
}

/// f32 callback: read directly into the device buffer.
fn create_f32_callback(
    shared: Arc<OutputShared>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut priority = CallbackPriority::from_env();
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        priority.apply();
        shared.fill(data);
    }
}

/// Integer callback: read into a scratch buffer and convert.
fn create_int_callback<T: cpal::SizedSample + cpal::FromSample<f32>>(
    shared: Arc<OutputShared>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut priority = CallbackPriority::from_env();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        priority.apply();
        let mut scratch = vec![0.0f32; data.len()];
        shared.fill(&mut scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// The playback side of the buffer pipeline: decoded samples go into the
/// ring, the device callback drains it. Stops when the stream has ended and
/// the ring has drained.
pub struct OutputQueue {
    ring: Arc<SampleRing>,
    stream: cpal::Stream,
    end_of_stream: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    stop: StopHandle,
}

impl OutputQueue {
    /// Builds an output stream on the device matching the source's channel
    /// count and sample rate, but does not start it.
    pub fn new(
        device: &OutputDevice,
        format: &StreamFormat,
        stop: StopHandle,
    ) -> Result<OutputQueue, Box<dyn Error>> {
        if device.max_channels() < format.channels {
            return Err(format!(
                "{} channels required, audio device {} only has {}",
                format.channels,
                device.name(),
                device.max_channels()
            )
            .into());
        }

        let ring = ring_for_format(format);
        let end_of_stream = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(OutputShared {
            ring: ring.clone(),
            end_of_stream: end_of_stream.clone(),
            finished: finished.clone(),
            stop: stop.clone(),
        });

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| error!("Output stream error: {}", err);
        let stream = match device.default_sample_format() {
            cpal::SampleFormat::F32 => {
                let mut callback = create_f32_callback(shared);
                device.raw().build_output_stream(
                    &config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| callback(data, info),
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::I16 => {
                let mut callback = create_int_callback::<i16>(shared);
                device.raw().build_output_stream(
                    &config,
                    move |data: &mut [i16], info: &cpal::OutputCallbackInfo| callback(data, info),
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::I32 => {
                let mut callback = create_int_callback::<i32>(shared);
                device.raw().build_output_stream(
                    &config,
                    move |data: &mut [i32], info: &cpal::OutputCallbackInfo| callback(data, info),
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(format!("unsupported device sample format {}", other).into());
            }
        };

        Ok(OutputQueue {
            ring,
            stream,
            end_of_stream,
            finished,
            stop,
        })
    }

    pub fn start(&self) -> Result<(), Box<dyn Error>> {
        self.stream.play()?;
        Ok(())
    }

    /// A Send handle for the thread feeding decoded samples into the ring.
    /// The stream itself stays on the thread that built it.
    pub fn producer(&self) -> RingProducer {
        RingProducer {
            ring: self.ring.clone(),
            end_of_stream: self.end_of_stream.clone(),
            finished: self.finished.clone(),
            stop: self.stop.clone(),
        }
    }

    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }
}

/// The producer side of an [`OutputQueue`]'s ring.
pub struct RingProducer {
    ring: Arc<SampleRing>,
    end_of_stream: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    stop: StopHandle,
}

impl RingProducer {
    /// Pushes decoded samples into the ring, napping while the ring is full.
    /// Returns false if the operation was stopped before everything fit.
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut written = 0usize;
        while written < samples.len() {
            if self.stop.is_stopped() {
                return false;
            }
            let n = self.ring.write(&samples[written..]);
            if n == 0 {
                spin_sleep::sleep(RING_FULL_BACKOFF);
                continue;
            }
            written += n;
        }
        true
    }

    /// Marks the end of the stream: once the ring drains, the queue reports
    /// itself finished.
    pub fn mark_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Relaxed);
        // The callback may already have drained the ring.
        if self.ring.available() == 0 && !self.finished.swap(true, Ordering::Relaxed) {
            self.stop.notify();
        }
    }
}

/// The capture side of the buffer pipeline: the device callback writes
/// captured samples into the ring, the pump drains it into pool buffers.
pub struct InputQueue {
    ring: Arc<SampleRing>,
    stream: cpal::Stream,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl InputQueue {
    pub fn new(
        device: &InputDevice,
        channels: u16,
        sample_rate: u32,
    ) -> Result<InputQueue, Box<dyn Error>> {
        let capacity = (sample_rate as usize * channels as usize) / RING_SECONDS_DIVISOR;
        let ring = Arc::new(SampleRing::new(capacity.max(1024), channels));
        let running = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| error!("Input stream error: {}", err);
        let stream = match device.default_sample_format() {
            cpal::SampleFormat::F32 => {
                let mut callback = create_capture_callback::<f32>(
                    ring.clone(),
                    running.clone(),
                    dropped.clone(),
                );
                device.raw().build_input_stream(
                    &config,
                    move |data: &[f32], info: &cpal::InputCallbackInfo| callback(data, info),
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::I16 => {
                let mut callback = create_capture_callback::<i16>(
                    ring.clone(),
                    running.clone(),
                    dropped.clone(),
                );
                device.raw().build_input_stream(
                    &config,
                    move |data: &[i16], info: &cpal::InputCallbackInfo| callback(data, info),
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::I32 => {
                let mut callback = create_capture_callback::<i32>(
                    ring.clone(),
                    running.clone(),
                    dropped.clone(),
                );
                device.raw().build_input_stream(
                    &config,
                    move |data: &[i32], info: &cpal::InputCallbackInfo| callback(data, info),
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(format!("unsupported device sample format {}", other).into());
            }
        };

        Ok(InputQueue {
            ring,
            stream,
            running,
            dropped,
        })
    }

    pub fn start(&self) -> Result<(), Box<dyn Error>> {
        self.stream.play()?;
        Ok(())
    }

    /// A Send handle for the thread draining captured samples out of the
    /// ring. The stream itself stays on the thread that built it.
    pub fn consumer(&self) -> RingConsumer {
        RingConsumer {
            ring: self.ring.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Samples dropped because the pump couldn't keep up with the device.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The consumer side of an [`InputQueue`]'s ring.
pub struct RingConsumer {
    ring: Arc<SampleRing>,
}

impl RingConsumer {
    /// Drains captured samples into `out`, returning how many were taken.
    pub fn pop(&self, out: &mut [f32]) -> usize {
        self.ring.read(out)
    }
}

/// Capture callback: convert to f32 and write into the ring. The callback
/// never blocks; overruns are counted instead.
fn create_capture_callback<T: cpal::SizedSample>(
    ring: Arc<SampleRing>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static
where
    f32: cpal::FromSample<T>,
{
    let mut priority = CallbackPriority::from_env();
    move |data: &[T], _: &cpal::InputCallbackInfo| {
        priority.apply();
        running.store(true, Ordering::Relaxed);
        let scratch: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
        let written = ring.write(&scratch);
        if written < scratch.len() {
            dropped.fetch_add((scratch.len() - written) as u64, Ordering::Relaxed);
        }
    }
}
