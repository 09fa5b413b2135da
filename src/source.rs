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
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32BE,
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_S16BE,
    CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24BE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32BE,
    CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_S8, CODEC_TYPE_PCM_U16BE, CODEC_TYPE_PCM_U16LE,
    CODEC_TYPE_PCM_U24BE, CODEC_TYPE_PCM_U24LE, CODEC_TYPE_PCM_U32BE, CODEC_TYPE_PCM_U32LE,
    CODEC_TYPE_PCM_U8,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::format::{SampleFormat, StreamFormat};
use crate::pool::PacketBuffer;

/// Packet upper bound when the codec has no predictable packet duration.
const DEFAULT_MAX_PACKET_SIZE: u32 = 16 * 1024;

/// Constant bit-rate buffers are decoded by re-slicing into runs of at most
/// this many frames.
const CBR_CHUNK_FRAMES: u64 = 4096;

/// Error types for packet source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot decode any of the formats in {0}")]
    NoDecodableTrack(String),

    #[error("stream does not declare its {0}")]
    MissingParameter(&'static str),

    #[error("audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads runs of packets from an audio file into pool buffers. The stream is
/// selected by cross-referencing the container's track list against the
/// decoders the codec registry actually provides.
pub struct PacketSource {
    reader: Box<dyn FormatReader>,
    codec_params: CodecParameters,
    track_id: u32,
    format: StreamFormat,
    /// A packet that didn't fit the previous buffer, carried to the next fill.
    pending: Option<Packet>,
    eof: bool,
}

impl PacketSource {
    /// Opens the given audio file and resolves a decodable stream from it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PacketSource, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            SourceError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // A hint from the extension helps the probe along.
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(SourceError::Audio)?;
        let reader = probed.format;

        // Cross-reference the container's tracks against the decoders the
        // registry provides and take the first one we can actually decode.
        let registry = get_codecs();
        let num_tracks = reader.tracks().len();
        if num_tracks > 1 {
            debug!(tracks = num_tracks, "File has a layered data format");
        }
        let track = reader
            .tracks()
            .iter()
            .find(|t| {
                t.codec_params.codec != CODEC_TYPE_NULL
                    && registry.get_codec(t.codec_params.codec).is_some()
            })
            .ok_or_else(|| SourceError::NoDecodableTrack(path.display().to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let format = stream_format_from_params(&codec_params)?;
        debug!(track = track_id, format = %format, "Resolved stream format");

        Ok(PacketSource {
            reader,
            codec_params,
            track_id,
            format,
            pending: None,
            eof: false,
        })
    }

    /// The format of the resolved stream.
    pub fn stream_format(&self) -> &StreamFormat {
        &self.format
    }

    /// Creates a decoder for this source's stream. The magic cookie travels
    /// inside the codec parameters.
    pub fn make_decoder(&self) -> Result<PacketDecoder, SourceError> {
        PacketDecoder::new(&self.codec_params, self.track_id, &self.format)
    }

    /// Fills the buffer with up to `max_packets` packets. Returns the number
    /// of packets read; zero is the EOF condition. A packet that doesn't fit
    /// the remaining space is held back for the next fill.
    pub fn read_packets(
        &mut self,
        buffer: &mut PacketBuffer,
        max_packets: u32,
    ) -> Result<usize, SourceError> {
        if self.eof {
            return Ok(0);
        }

        let described = self.format.is_vbr();
        let mut count = 0usize;
        while (count as u32) < max_packets {
            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => match self.next_packet()? {
                    Some(packet) => packet,
                    None => {
                        self.eof = true;
                        break;
                    }
                },
            };

            if !buffer.fits(packet.data.len()) {
                self.pending = Some(packet);
                break;
            }

            buffer.push_packet(&packet.data, packet.ts(), packet.dur(), described);
            count += 1;
        }

        Ok(count)
    }

    /// Reads the next packet for our track, mapping the decoder-dependent
    /// end-of-stream signals to None:
    /// - UnexpectedEof is the usual end of file
    /// - some decoders return DecodeError at EOF instead of an IO error
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            match self.reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }
                    return Ok(Some(packet));
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::DecodeError(_)) => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Derives a [`StreamFormat`] from the selected track's codec parameters.
fn stream_format_from_params(params: &CodecParameters) -> Result<StreamFormat, SourceError> {
    let codec_name = get_codecs()
        .get_codec(params.codec)
        .map(|descriptor| descriptor.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let sample_rate = params
        .sample_rate
        .ok_or(SourceError::MissingParameter("sample rate"))?;
    let layout = params.channels;
    let channels = layout
        .map(|channels| channels.count() as u16)
        .filter(|count| *count > 0)
        .ok_or(SourceError::MissingParameter("channel count"))?;

    let bits_per_sample = params.bits_per_sample.unwrap_or(16) as u16;
    let sample_format = if is_float_pcm(params.codec) {
        SampleFormat::Float
    } else {
        SampleFormat::Int
    };

    // PCM streams have constant bit-rate framing: one frame per packet, like
    // the canonical linear PCM stream description. Everything else is VBR
    // with whatever packet duration the codec declares.
    let (frames_per_packet, bytes_per_packet, max_packet_size) = if is_pcm(params.codec) {
        let coded_bits = params
            .bits_per_coded_sample
            .or(params.bits_per_sample)
            .unwrap_or(16);
        let bytes_per_frame = u32::from(channels) * coded_bits.div_ceil(8);
        (1, Some(bytes_per_frame), bytes_per_frame)
    } else {
        let frames_per_packet = params.max_frames_per_packet.unwrap_or(0) as u32;
        let max_packet_size = if frames_per_packet > 0 {
            // Compressed packets are smaller than the PCM they decode to, so
            // the decoded size bounds the packet size.
            (frames_per_packet * u32::from(channels) * 4).max(4096)
        } else {
            DEFAULT_MAX_PACKET_SIZE
        };
        (frames_per_packet, None, max_packet_size)
    };

    Ok(StreamFormat {
        codec_name,
        sample_rate,
        channels,
        layout,
        sample_format,
        bits_per_sample,
        frames_per_packet,
        bytes_per_packet,
        max_packet_size,
        magic_cookie: params.extra_data.as_ref().map(|data| data.to_vec()),
        n_frames: params.n_frames,
        delay: params.delay.unwrap_or(0),
        padding: params.padding.unwrap_or(0),
    })
}

fn is_pcm(codec: CodecType) -> bool {
    [
        CODEC_TYPE_PCM_S8,
        CODEC_TYPE_PCM_S16LE,
        CODEC_TYPE_PCM_S16BE,
        CODEC_TYPE_PCM_S24LE,
        CODEC_TYPE_PCM_S24BE,
        CODEC_TYPE_PCM_S32LE,
        CODEC_TYPE_PCM_S32BE,
        CODEC_TYPE_PCM_U8,
        CODEC_TYPE_PCM_U16LE,
        CODEC_TYPE_PCM_U16BE,
        CODEC_TYPE_PCM_U24LE,
        CODEC_TYPE_PCM_U24BE,
        CODEC_TYPE_PCM_U32LE,
        CODEC_TYPE_PCM_U32BE,
        CODEC_TYPE_PCM_F32LE,
        CODEC_TYPE_PCM_F32BE,
        CODEC_TYPE_PCM_F64LE,
        CODEC_TYPE_PCM_F64BE,
    ]
    .contains(&codec)
}

fn is_float_pcm(codec: CodecType) -> bool {
    [
        CODEC_TYPE_PCM_F32LE,
        CODEC_TYPE_PCM_F32BE,
        CODEC_TYPE_PCM_F64LE,
        CODEC_TYPE_PCM_F64BE,
    ]
    .contains(&codec)
}

/// Decodes pool buffers back into interleaved f32 samples. VBR buffers are
/// split by their packet descriptions; CBR buffers are re-sliced uniformly.
pub struct PacketDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    vbr: bool,
    /// Bytes per packet for CBR slicing.
    bytes_per_packet: usize,
}

impl PacketDecoder {
    fn new(
        params: &CodecParameters,
        track_id: u32,
        format: &StreamFormat,
    ) -> Result<PacketDecoder, SourceError> {
        let vbr = format.is_vbr();
        let mut params = params.clone();
        if !vbr {
            // CBR buffers are decoded in chunks larger than the stream's
            // nominal one-frame packets, so make sure the decoder sizes its
            // output accordingly.
            params.with_max_frames_per_packet(CBR_CHUNK_FRAMES);
        }

        let decoder = get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(SourceError::Audio)?;

        Ok(PacketDecoder {
            decoder,
            track_id,
            vbr,
            bytes_per_packet: format.bytes_per_packet.unwrap_or(0) as usize,
        })
    }

    /// Decodes every packet in the buffer, appending interleaved f32 samples
    /// to `out`. Returns the number of frames decoded.
    pub fn decode_buffer(
        &mut self,
        buffer: &PacketBuffer,
        out: &mut Vec<f32>,
    ) -> Result<u64, SourceError> {
        let mut frames = 0u64;

        if self.vbr {
            for description in buffer.descriptions() {
                let data =
                    &buffer.data()[description.offset..description.offset + description.byte_size];
                let packet = Packet::new_from_slice(
                    self.track_id,
                    description.timestamp,
                    description.frames,
                    data,
                );
                frames += self.decode_packet(&packet, out)?;
            }
        } else {
            let chunk_bytes = self.bytes_per_packet * CBR_CHUNK_FRAMES as usize;
            if chunk_bytes == 0 {
                return Err(SourceError::MissingParameter("packet size"));
            }
            let mut timestamp = buffer.start_timestamp();
            for chunk in buffer.data().chunks(chunk_bytes) {
                let chunk_frames = (chunk.len() / self.bytes_per_packet) as u64;
                let packet = Packet::new_from_slice(self.track_id, timestamp, chunk_frames, chunk);
                frames += self.decode_packet(&packet, out)?;
                timestamp += chunk_frames;
            }
        }

        Ok(frames)
    }

    fn decode_packet(&mut self, packet: &Packet, out: &mut Vec<f32>) -> Result<u64, SourceError> {
        let decoded = match self.decoder.decode(packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                self.decoder
                    .decode(packet)
                    .map_err(SourceError::Audio)?
            }
            Err(e) => return Err(SourceError::Audio(e)),
        };
        Ok(interleave_to_f32(decoded, out))
    }
}

/// Converts a decoded buffer to interleaved f32 samples appended to `out`,
/// returning the frame count.
fn interleave_to_f32(decoded: AudioBufferRef, out: &mut Vec<f32>) -> u64 {
    match decoded {
        AudioBufferRef::F32(buf) => interleave_planar(&buf, out, |sample| sample),
        AudioBufferRef::F64(buf) => interleave_planar(&buf, out, |sample| sample as f32),
        AudioBufferRef::S8(buf) => interleave_planar(&buf, out, scale_s8),
        AudioBufferRef::S16(buf) => interleave_planar(&buf, out, scale_s16),
        AudioBufferRef::S24(buf) => interleave_planar(&buf, out, |sample| scale_s24(sample.inner())),
        AudioBufferRef::S32(buf) => interleave_planar(&buf, out, scale_s32),
        AudioBufferRef::U8(buf) => interleave_planar(&buf, out, scale_u8),
        AudioBufferRef::U16(buf) => interleave_planar(&buf, out, scale_u16),
        AudioBufferRef::U24(buf) => interleave_planar(&buf, out, |sample| scale_u24(sample.inner())),
        AudioBufferRef::U32(buf) => interleave_planar(&buf, out, scale_u32),
    }
}

/// Interleaves planar samples from a decoded buffer. The closure converts a
/// single native sample to f32.
fn interleave_planar<T, F>(buf: &AudioBuffer<T>, out: &mut Vec<f32>, convert: F) -> u64
where
    T: symphonia::core::sample::Sample,
    F: Fn(T) -> f32,
{
    let frames = buf.frames();
    let channels = buf.spec().channels.count();
    let planes = buf.planes();
    out.reserve(frames * channels);
    for frame_idx in 0..frames {
        for ch_idx in 0..channels {
            out.push(convert(planes.planes()[ch_idx][frame_idx]));
        }
    }
    frames as u64
}

// Scaling helpers for all integer formats. These are `pub(crate)` so they can
// be validated directly in unit tests.

#[inline]
pub(crate) fn scale_s8(sample: i8) -> f32 {
    sample as f32 / (1i64 << 7) as f32
}

#[inline]
pub(crate) fn scale_s16(sample: i16) -> f32 {
    sample as f32 / (1i64 << 15) as f32
}

#[inline]
pub(crate) fn scale_s24(sample: i32) -> f32 {
    sample as f32 / (1i64 << 23) as f32
}

#[inline]
pub(crate) fn scale_s32(sample: i32) -> f32 {
    sample as f32 / (1i64 << 31) as f32
}

#[inline]
pub(crate) fn scale_u8(sample: u8) -> f32 {
    (sample as f32 / u8::MAX as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u16(sample: u16) -> f32 {
    (sample as f32 / u16::MAX as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u24(sample: u32) -> f32 {
    let max = (1u32 << 24) - 1;
    (sample as f32 / max as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u32(sample: u32) -> f32 {
    (sample as f32 / u32::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::format::{bytes_for_duration, SampleFormat, BUFFER_COUNT};
    use crate::pool::BufferPool;
    use crate::testutil;

    use super::*;

    #[test]
    fn test_open_resolves_wav_format() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tone.wav");
        testutil::write_sine_wav(&path, 44100, 2, Duration::from_millis(250), 440.0).expect("write wav");

        let source = PacketSource::open(&path).expect("open");
        let format = source.stream_format();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.channels, 2);
        assert_eq!(format.sample_format, SampleFormat::Int);
        assert_eq!(format.bits_per_sample, 16);
        assert!(!format.is_vbr());
        assert_eq!(format.bytes_per_packet, Some(4));
        assert_eq!(format.max_packet_size, 4);
        assert_eq!(format.n_frames, Some(44100 / 4));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            PacketSource::open("/does/not/exist.wav"),
            Err(SourceError::Io(_))
        ));
    }

    #[test]
    fn test_read_packets_until_eof() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tone.wav");
        testutil::write_sine_wav(&path, 8000, 1, Duration::from_millis(500), 220.0).expect("write wav");

        let mut source = PacketSource::open(&path).expect("open");
        let format = source.stream_format().clone();
        let (buffer_size, packets_per_read) = bytes_for_duration(&format, 0.5);

        let pool = BufferPool::new(BUFFER_COUNT, buffer_size as usize);
        let recycler = pool.recycler();

        let mut total_bytes = 0usize;
        let mut last_timestamp = 0u64;
        loop {
            let mut buffer = pool.try_acquire().expect("pool buffer");
            let packets = source.read_packets(&mut buffer, packets_per_read).expect("read");
            if packets == 0 {
                // Reading zero packets is the EOF condition.
                assert!(buffer.is_empty());
                break;
            }
            assert!(buffer.start_timestamp() >= last_timestamp);
            last_timestamp = buffer.start_timestamp();
            total_bytes += buffer.len();
            recycler.release(buffer);
        }

        // 0.5s of 8kHz mono 16-bit is 8000 bytes.
        assert_eq!(total_bytes, 8000);

        // EOF is sticky.
        let mut buffer = pool.try_acquire().expect("pool buffer");
        assert_eq!(source.read_packets(&mut buffer, packets_per_read).expect("read"), 0);
    }

    #[test]
    fn test_decode_buffer_round_trips_samples() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tone.wav");
        testutil::write_sine_wav(&path, 8000, 1, Duration::from_millis(250), 220.0).expect("write wav");

        let mut source = PacketSource::open(&path).expect("open");
        let format = source.stream_format().clone();
        let (buffer_size, packets_per_read) = bytes_for_duration(&format, 1.0);
        let mut decoder = source.make_decoder().expect("decoder");

        let pool = BufferPool::new(BUFFER_COUNT, buffer_size as usize);
        let recycler = pool.recycler();

        let mut samples: Vec<f32> = Vec::new();
        loop {
            let mut buffer = pool.try_acquire().expect("pool buffer");
            if source.read_packets(&mut buffer, packets_per_read).expect("read") == 0 {
                break;
            }
            decoder.decode_buffer(&buffer, &mut samples).expect("decode");
            recycler.release(buffer);
        }

        assert_eq!(samples.len(), 2000);
        // The decoded tone should have roughly the RMS of a sine at the
        // amplitude we generated (0.5 / sqrt(2)).
        let rms = testutil::rms(&samples);
        assert!((rms - 0.3535).abs() < 0.01, "unexpected RMS {}", rms);
    }

    #[test]
    fn test_integer_scaling() {
        assert_eq!(scale_s16(i16::MIN), -1.0);
        assert!(scale_s16(i16::MAX) < 1.0);
        assert_eq!(scale_s16(0), 0.0);
        assert_eq!(scale_s8(i8::MIN), -1.0);
        assert_eq!(scale_s32(i32::MIN), -1.0);
        assert_eq!(scale_u8(0), -1.0);
        assert_eq!(scale_u8(u8::MAX), 1.0);
        assert!((scale_u16(u16::MAX / 2)).abs() < 0.001);
    }
}
