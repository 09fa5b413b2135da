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

use tracing::{debug, info, span, Level};

use crate::format::{bytes_for_duration, BUFFER_COUNT};
use crate::pool::BufferPool;
use crate::sink::{FileEncoding, WavSink};
use crate::source::PacketSource;
use crate::util;

/// Seconds of audio per pool buffer while rendering. Offline rendering is
/// not paced, so it uses larger reads than playback.
const RENDER_BUFFER_SECONDS: f64 = 1.0;

/// Options for the render operation.
pub struct RenderOptions {
    /// Gain applied in the decoded f32 domain.
    pub volume: f32,
}

impl Default for RenderOptions {
    fn default() -> RenderOptions {
        RenderOptions { volume: 1.0 }
    }
}

/// Decodes an audio file offline to a 16-bit PCM WAV file at the source's
/// sample rate and channel count. Codec priming frames are trimmed from the
/// start and trailing padding is dropped, so the output holds exactly the
/// stream's stated frame count when one is declared.
pub fn render(input: &Path, output: &Path, options: RenderOptions) -> Result<(), Box<dyn Error>> {
    let span = span!(Level::INFO, "render", file = util::filename_display(input));
    let _enter = span.enter();

    let mut source = PacketSource::open(input)?;
    let format = source.stream_format().clone();
    let mut decoder = source.make_decoder()?;

    info!(
        format = %format,
        output = util::filename_display(output),
        "Rendering file"
    );

    let (buffer_size, packets_per_read) = bytes_for_duration(&format, RENDER_BUFFER_SECONDS);
    debug!(
        buffer_size,
        packets_per_read, "Sized pool buffers for rendering"
    );

    let pool = BufferPool::new(BUFFER_COUNT, buffer_size as usize);
    let recycler = pool.recycler();

    let mut sink = WavSink::create(
        output,
        format.channels,
        format.sample_rate,
        FileEncoding::Int16,
    )?;
    sink.apply_magic_cookie(format.magic_cookie.as_deref());

    println!(
        "Rendering {} to {}",
        util::filename_display(input),
        util::filename_display(output)
    );

    let channels = format.channels as usize;
    let mut delay_remaining = u64::from(format.delay);
    let mut frames_remaining = format.n_frames;
    let mut decoded: Vec<f32> = Vec::new();

    loop {
        let mut buffer = match pool.try_acquire() {
            Some(buffer) => buffer,
            // The synchronous loop always returns buffers before reuse.
            None => return Err("buffer pool exhausted".into()),
        };

        let packets = source.read_packets(&mut buffer, packets_per_read)?;
        if packets == 0 {
            recycler.release(buffer);
            break;
        }
        debug!(
            packets = buffer.packet_count(),
            bytes = buffer.len(),
            "Filled buffer"
        );

        decoded.clear();
        decoder.decode_buffer(&buffer, &mut decoded)?;
        recycler.release(buffer);

        let mut frames = (decoded.len() / channels) as u64;
        let mut start = 0usize;

        // Trim codec priming frames at the start of the stream.
        if delay_remaining > 0 {
            let skip = delay_remaining.min(frames);
            start = (skip as usize) * channels;
            frames -= skip;
            delay_remaining -= skip;
        }

        // Stop at the stream's stated frame count, dropping padding.
        if let Some(remaining) = frames_remaining {
            if frames > remaining {
                frames = remaining;
            }
            frames_remaining = Some(remaining - frames);
        }

        if frames == 0 {
            if frames_remaining == Some(0) {
                break;
            }
            continue;
        }

        let end = start + (frames as usize) * channels;
        let chunk = &mut decoded[start..end];
        if options.volume != 1.0 {
            for sample in chunk.iter_mut() {
                *sample *= options.volume;
            }
        }
        sink.write(chunk)?;

        if frames_remaining == Some(0) {
            break;
        }
    }

    // Codecs may finalize their cookie at the end of a session.
    sink.apply_magic_cookie(format.magic_cookie.as_deref());
    sink.finalize()?;

    println!(
        "Rendered {} frames to {}",
        sink.frames_written(),
        util::filename_display(output)
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::{render, RenderOptions};
    use crate::testutil;

    #[test]
    fn test_render_wav_to_wav() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        testutil::write_sine_wav(&input, 8000, 2, Duration::from_millis(500), 440.0)
            .expect("write fixture");

        render(&input, &output, RenderOptions::default()).expect("render");

        let mut reader = hound::WavReader::open(&output).expect("open output");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);

        // 500ms at 8kHz stereo.
        assert_eq!(reader.len(), 8000);

        let samples: Vec<f32> = reader
            .samples::<i16>()
            .map(|sample| sample.expect("sample") as f32 / 32768.0)
            .collect();
        let rms = testutil::rms(&samples);
        assert!((rms - 0.3535).abs() < 0.01, "unexpected rms: {}", rms);
    }

    #[test]
    fn test_render_applies_volume() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        testutil::write_sine_wav(&input, 8000, 1, Duration::from_millis(250), 440.0)
            .expect("write fixture");

        render(&input, &output, RenderOptions { volume: 0.5 }).expect("render");

        let mut reader = hound::WavReader::open(&output).expect("open output");
        let samples: Vec<f32> = reader
            .samples::<i16>()
            .map(|sample| sample.expect("sample") as f32 / 32768.0)
            .collect();
        let rms = testutil::rms(&samples);
        // Half the amplitude of the 0.5 sine.
        assert!((rms - 0.1768).abs() < 0.01, "unexpected rms: {}", rms);
    }

    #[test]
    fn test_render_rejects_non_wav_output() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("in.wav");
        testutil::write_sine_wav(&input, 8000, 1, Duration::from_millis(100), 440.0)
            .expect("write fixture");

        let result = render(
            &input,
            &dir.path().join("out.caf"),
            RenderOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_render_missing_input() {
        let dir = tempdir().expect("tempdir");
        let result = render(
            &dir.path().join("missing.wav"),
            &dir.path().join("out.wav"),
            RenderOptions::default(),
        );
        assert!(result.is_err());
    }
}
