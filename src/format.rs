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

use std::{fmt, time::Duration};

use symphonia::core::audio::Channels;

/// The number of buffers cycled between the file side and the device side of
/// a pipeline. Buffers are allocated once and recycled until the operation
/// finishes.
pub const BUFFER_COUNT: usize = 3;

/// Buffer ceiling: 64 KiB.
const MAX_BUFFER_SIZE: u32 = 0x10000;
/// Buffer floor: 16 KiB. We don't want to go to the disk for tiny chunks.
const MIN_BUFFER_SIZE: u32 = 0x4000;

/// Sample format enumeration for audio processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer samples (e.g., 16-bit, 24-bit, 32-bit)
    Int,
    /// Floating point samples (e.g., 32-bit float, 64-bit float)
    Float,
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Describes the packet stream selected from a source file: enough to size
/// buffers, construct a decoder, and propagate the codec's out-of-band setup
/// data to whoever consumes the packets.
#[derive(Debug, Clone)]
pub struct StreamFormat {
    /// Short name of the codec ("mp3", "flac", "pcm_s16le", ...).
    pub codec_name: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// The channel layout, when the container declares one.
    pub layout: Option<Channels>,
    /// Sample format of the decoded stream.
    pub sample_format: SampleFormat,
    /// Bits per sample of the decoded stream.
    pub bits_per_sample: u16,
    /// Frames per packet. Zero when the codec has no predictable
    /// packet-to-time relationship.
    pub frames_per_packet: u32,
    /// Bytes per packet for constant bit-rate framing. None for VBR.
    pub bytes_per_packet: Option<u32>,
    /// Upper bound on the size of a single packet, in bytes.
    pub max_packet_size: u32,
    /// Codec-specific out-of-band configuration (the magic cookie). Handed to
    /// the decoder at construction and reapplied to output files that accept
    /// one.
    pub magic_cookie: Option<Vec<u8>>,
    /// Total frames in the stream, when the container declares it.
    pub n_frames: Option<u64>,
    /// Codec priming frames to trim from the start of decoded output.
    pub delay: u32,
    /// Codec padding frames appended past the end of the stream.
    pub padding: u32,
}

impl StreamFormat {
    /// Variable bit-rate framing: per-packet descriptions are required to
    /// make sense of a buffer full of packets.
    pub fn is_vbr(&self) -> bool {
        self.bytes_per_packet.is_none() || self.frames_per_packet == 0
    }

    /// The stream duration when the container declares a frame count.
    pub fn duration(&self) -> Option<Duration> {
        self.n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate)))
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch, {} Hz, '{}', {} {}-bit",
            self.channels, self.sample_rate, self.codec_name, self.sample_format, self.bits_per_sample,
        )?;
        match self.bytes_per_packet {
            Some(bytes) => write!(f, ", {} bytes/packet", bytes)?,
            None => write!(f, ", vbr")?,
        }
        if self.frames_per_packet > 0 {
            write!(f, ", {} frames/packet", self.frames_per_packet)?;
        }
        if let Some(layout) = self.layout {
            write!(f, ", layout [{}]", layout)?;
        }
        Ok(())
    }
}

/// Sizes a pool buffer to hold roughly `seconds` of audio for the given
/// format, returning the buffer byte size and the number of packets to read
/// per fill. Buffer sizes are kept between 16 KiB and 64 KiB, except that a
/// single packet must always fit.
pub fn bytes_for_duration(format: &StreamFormat, seconds: f64) -> (u32, u32) {
    let max_packet_size = format.max_packet_size.max(1);

    let mut buffer_size = if format.frames_per_packet > 0 {
        let packets_for_time =
            f64::from(format.sample_rate) / f64::from(format.frames_per_packet) * seconds;
        (packets_for_time * f64::from(max_packet_size)) as u32
    } else {
        // If frames per packet is zero the codec has no predictable
        // packet-to-time relationship, so we can't tailor this. Use the
        // default ceiling.
        MAX_BUFFER_SIZE.max(max_packet_size)
    };

    if buffer_size > MAX_BUFFER_SIZE && buffer_size > max_packet_size {
        buffer_size = MAX_BUFFER_SIZE;
    } else if buffer_size < MIN_BUFFER_SIZE {
        buffer_size = MIN_BUFFER_SIZE;
    }

    (buffer_size, (buffer_size / max_packet_size).max(1))
}

#[cfg(test)]
mod test {
    use super::*;

    fn format(frames_per_packet: u32, bytes_per_packet: Option<u32>, max_packet: u32) -> StreamFormat {
        StreamFormat {
            codec_name: "test".to_string(),
            sample_rate: 44100,
            channels: 2,
            layout: None,
            sample_format: SampleFormat::Int,
            bits_per_sample: 16,
            frames_per_packet,
            bytes_per_packet,
            max_packet_size: max_packet,
            magic_cookie: None,
            n_frames: Some(44100),
            delay: 0,
            padding: 0,
        }
    }

    #[test]
    fn test_vbr_detection() {
        assert!(format(1152, None, 1024).is_vbr());
        assert!(format(0, Some(4), 4).is_vbr());
        assert!(!format(1, Some(4), 4).is_vbr());
    }

    #[test]
    fn test_bytes_for_duration_clamps_to_ceiling() {
        // PCM-style framing: one frame per 4-byte packet. Half a second would
        // be 88200 bytes, which is over the 64 KiB ceiling.
        let (size, packets) = bytes_for_duration(&format(1, Some(4), 4), 0.5);
        assert_eq!(size, 0x10000);
        assert_eq!(packets, 0x10000 / 4);
    }

    #[test]
    fn test_bytes_for_duration_clamps_to_floor() {
        // A tiny read target still goes to disk for at least 16 KiB.
        let (size, packets) = bytes_for_duration(&format(1152, None, 512), 0.1);
        assert_eq!(size, 0x4000);
        assert_eq!(packets, 0x4000 / 512);
    }

    #[test]
    fn test_bytes_for_duration_unpredictable_packets() {
        // Frames per packet of zero falls back to the default ceiling.
        let (size, packets) = bytes_for_duration(&format(0, None, 2048), 0.5);
        assert_eq!(size, 0x10000);
        assert_eq!(packets, 0x10000 / 2048);
    }

    #[test]
    fn test_bytes_for_duration_oversized_packet() {
        // A single packet larger than the ceiling must still fit.
        let (size, packets) = bytes_for_duration(&format(0, None, 0x20000), 0.5);
        assert_eq!(size, 0x20000);
        assert_eq!(packets, 1);
    }

    #[test]
    fn test_stream_format_duration() {
        let format = format(1, Some(4), 4);
        assert_eq!(format.duration(), Some(Duration::from_secs(1)));
    }
}
