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
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::util;

/// Errors encountered while writing audio files.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unsupported file extension for {0}, expected .wav")]
    UnsupportedExtension(String),
    #[error("no encoder available for format {0}")]
    NoEncoder(String),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

/// The sample encoding used for recorded files.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FileEncoding {
    #[default]
    Int16,
    Int24,
    Int32,
    Float32,
}

impl FileEncoding {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            FileEncoding::Int16 => 16,
            FileEncoding::Int24 => 24,
            FileEncoding::Int32 | FileEncoding::Float32 => 32,
        }
    }

    fn sample_format(&self) -> hound::SampleFormat {
        match self {
            FileEncoding::Float32 => hound::SampleFormat::Float,
            _ => hound::SampleFormat::Int,
        }
    }
}

impl FromStr for FileEncoding {
    type Err = SinkError;

    /// Accepts both plain names (int16, float32) and linear PCM four-cc
    /// notation. Anything that is not linear PCM has no encoder here.
    fn from_str(s: &str) -> Result<FileEncoding, Self::Err> {
        match s.to_lowercase().as_str() {
            "int16" | "16" => return Ok(FileEncoding::Int16),
            "int24" | "24" => return Ok(FileEncoding::Int24),
            "int32" | "32" => return Ok(FileEncoding::Int32),
            "float32" | "f32" => return Ok(FileEncoding::Float32),
            _ => {}
        }
        match util::parse_four_cc(s) {
            Ok(four_cc) if &four_cc == b"lpcm" => Ok(FileEncoding::Int16),
            _ => Err(SinkError::NoEncoder(s.to_string())),
        }
    }
}

/// A WAV file sink for the recording pipeline. Existing files are truncated.
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    encoding: FileEncoding,
    frames_written: u64,
    channels: u16,
}

impl WavSink {
    pub fn create<P: AsRef<Path>>(
        path: P,
        channels: u16,
        sample_rate: u32,
        encoding: FileEncoding,
    ) -> Result<WavSink, SinkError> {
        let path = path.as_ref();
        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if !is_wav {
            return Err(SinkError::UnsupportedExtension(
                util::filename_display(path).to_string(),
            ));
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: encoding.bits_per_sample(),
            sample_format: encoding.sample_format(),
        };
        let writer = hound::WavWriter::create(path, spec)?;

        Ok(WavSink {
            writer: Some(writer),
            encoding,
            frames_written: 0,
            channels,
        })
    }

    /// Applies the codec's magic cookie to the file. WAV carries its format
    /// in the header alone, so there is nothing to store, but the pipeline
    /// applies the cookie both before recording and again at the end in case
    /// the codec updated it while running.
    pub fn apply_magic_cookie(&self, cookie: Option<&[u8]>) {
        match cookie {
            Some(cookie) => debug!(len = cookie.len(), "Magic cookie not stored for wav"),
            None => debug!("No magic cookie to apply"),
        }
    }

    /// Writes interleaved f32 samples, converting to the file encoding.
    pub fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Ok(()),
        };

        match self.encoding {
            FileEncoding::Int16 => {
                for &sample in samples {
                    writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
                }
            }
            FileEncoding::Int24 => {
                for &sample in samples {
                    writer.write_sample((sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32)?;
                }
            }
            FileEncoding::Int32 => {
                for &sample in samples {
                    writer.write_sample((sample.clamp(-1.0, 1.0) * 2_147_483_647.0) as i32)?;
                }
            }
            FileEncoding::Float32 => {
                for &sample in samples {
                    writer.write_sample(sample)?;
                }
            }
        }

        self.frames_written += (samples.len() / self.channels as usize) as u64;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Finalizes the WAV header. Must be called before drop for the file to
    /// carry correct lengths.
    pub fn finalize(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::{FileEncoding, SinkError, WavSink};

    #[test]
    fn test_encoding_from_str() {
        assert_eq!(
            "int16".parse::<FileEncoding>().expect("parse"),
            FileEncoding::Int16
        );
        assert_eq!(
            "float32".parse::<FileEncoding>().expect("parse"),
            FileEncoding::Float32
        );
        // Linear PCM four-cc maps to the default integer encoding.
        assert_eq!(
            "lpcm".parse::<FileEncoding>().expect("parse"),
            FileEncoding::Int16
        );
        // Compressed formats have no encoder.
        assert!(matches!(
            "aac ".parse::<FileEncoding>(),
            Err(SinkError::NoEncoder(_))
        ));
    }

    #[test]
    fn test_rejects_non_wav_extension() {
        let dir = tempdir().expect("tempdir");
        let result = WavSink::create(
            dir.path().join("out.caf"),
            2,
            44100,
            FileEncoding::Int16,
        );
        assert!(matches!(result, Err(SinkError::UnsupportedExtension(_))));
    }

    #[test]
    fn test_write_and_finalize() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.wav");

        let mut sink =
            WavSink::create(&path, 2, 8000, FileEncoding::Int16).expect("create sink");
        sink.apply_magic_cookie(None);
        sink.write(&[0.0, 0.5, -0.5, 1.0]).expect("write");
        assert_eq!(sink.frames_written(), 2);
        sink.finalize().expect("finalize");

        let mut reader = hound::WavReader::open(&path).expect("open");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader
            .samples::<i16>()
            .map(|sample| sample.expect("sample"))
            .collect();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[3], 32767);
    }

    #[test]
    fn test_truncates_existing_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.wav");
        std::fs::write(&path, b"not a wav file at all").expect("write junk");

        let mut sink =
            WavSink::create(&path, 1, 8000, FileEncoding::Int16).expect("create sink");
        sink.write(&[0.25]).expect("write");
        sink.finalize().expect("finalize");

        let reader = hound::WavReader::open(&path).expect("open");
        assert_eq!(reader.len(), 1);
    }
}
