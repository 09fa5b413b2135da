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
use std::str::FromStr;

use rubato::{
    FastFixedIn, PolynomialDegree, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, VecResampler, WindowFunction,
};

/// Input block size for the resamplers.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Resampling quality for playback rate adjustment.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Quality {
    /// Polynomial interpolation, cheap.
    #[default]
    Low,
    /// Sinc interpolation, expensive.
    High,
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Quality, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "high" => Ok(Quality::High),
            other => Err(format!("unrecognized quality {}, expected low or high", other)),
        }
    }
}

/// Adjusts playback rate by resampling decoded audio. A rate of 2.0 plays
/// twice as fast (half as many output frames), 0.5 twice as slow. A rate of
/// exactly 1.0 bypasses resampling entirely.
pub struct RateConverter {
    /// None when the rate is 1.0.
    resampler: Option<Box<dyn VecResampler<f32>>>,
    channels: usize,
    /// Sliding window of input samples (planar).
    input: Vec<Vec<f32>>,
    /// Resampler output scratch (planar).
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(channels: u16, rate: f64, quality: Quality) -> Result<RateConverter, Box<dyn Error>> {
        let channels = channels as usize;
        if rate <= 0.0 {
            return Err(format!("playback rate must be positive, got {}", rate).into());
        }

        // Playing faster means producing fewer output frames per input frame.
        let resample_ratio = 1.0 / rate;
        let resampler: Option<Box<dyn VecResampler<f32>>> = if rate == 1.0 {
            None
        } else {
            match quality {
                Quality::Low => Some(Box::new(FastFixedIn::<f32>::new(
                    resample_ratio,
                    1.0,
                    PolynomialDegree::Linear,
                    INPUT_BLOCK_SIZE,
                    channels,
                )?)),
                Quality::High => {
                    let sinc_params = SincInterpolationParameters {
                        sinc_len: 256,
                        f_cutoff: 0.95,
                        oversampling_factor: 128,
                        interpolation: SincInterpolationType::Linear,
                        window: WindowFunction::BlackmanHarris2,
                    };
                    Some(Box::new(SincFixedIn::<f32>::new(
                        resample_ratio,
                        1.0,
                        sinc_params,
                        INPUT_BLOCK_SIZE,
                        channels,
                    )?))
                }
            }
        };

        let scratch = match &resampler {
            Some(resampler) => resampler.output_buffer_allocate(true),
            None => Vec::new(),
        };

        Ok(RateConverter {
            resampler,
            channels,
            input: vec![Vec::new(); channels],
            scratch,
        })
    }

    /// Pushes interleaved samples through the converter, appending converted
    /// interleaved samples to `out`. With a rate of 1.0 this is a plain copy.
    pub fn process(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<(), Box<dyn Error>> {
        if self.resampler.is_none() {
            out.extend_from_slice(samples);
            return Ok(());
        }

        for frame in samples.chunks_exact(self.channels) {
            for (channel, &sample) in self.input.iter_mut().zip(frame.iter()) {
                channel.push(sample);
            }
        }
        self.drain_blocks(out)
    }

    /// Flushes any buffered input, zero-padding the final partial block.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), Box<dyn Error>> {
        let resampler = match &self.resampler {
            Some(resampler) => resampler,
            None => return Ok(()),
        };

        if !self.input[0].is_empty() {
            let needed = resampler.input_frames_next();
            for channel in self.input.iter_mut() {
                channel.resize(needed, 0.0);
            }
        }
        self.drain_blocks(out)
    }

    /// Runs the resampler over every complete input block.
    fn drain_blocks(&mut self, out: &mut Vec<f32>) -> Result<(), Box<dyn Error>> {
        let resampler = match &mut self.resampler {
            Some(resampler) => resampler,
            None => return Ok(()),
        };

        loop {
            let needed = resampler.input_frames_next();
            if self.input[0].len() < needed {
                return Ok(());
            }

            let (consumed, produced) =
                resampler.process_into_buffer(&self.input, &mut self.scratch, None)?;

            for channel in self.input.iter_mut() {
                channel.drain(..consumed);
            }

            for frame in 0..produced {
                for channel in self.scratch.iter() {
                    out.push(channel[frame]);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Quality, RateConverter};

    #[test]
    fn test_quality_from_str() {
        assert_eq!("low".parse::<Quality>().expect("parse"), Quality::Low);
        assert_eq!("High".parse::<Quality>().expect("parse"), Quality::High);
        assert!("medium".parse::<Quality>().is_err());
    }

    #[test]
    fn test_bypass_copies_samples() {
        let mut converter = RateConverter::new(2, 1.0, Quality::Low).expect("converter");

        let input = vec![0.1f32, 0.2, 0.3, 0.4];
        let mut out = Vec::new();
        converter.process(&input, &mut out).expect("process");
        converter.flush(&mut out).expect("flush");
        assert_eq!(out, input);
    }

    #[test]
    fn test_double_rate_halves_output() {
        let mut converter = RateConverter::new(1, 2.0, Quality::Low).expect("converter");

        let input = vec![0.25f32; 8192];
        let mut out = Vec::new();
        converter.process(&input, &mut out).expect("process");
        converter.flush(&mut out).expect("flush");

        // Rate 2.0 should produce roughly half as many frames.
        let ratio = out.len() as f64 / input.len() as f64;
        assert!(
            (ratio - 0.5).abs() < 0.1,
            "unexpected output ratio: {}",
            ratio
        );
    }

    #[test]
    fn test_half_rate_doubles_output() {
        let mut converter = RateConverter::new(2, 0.5, Quality::Low).expect("converter");

        let input = vec![0.25f32; 8192];
        let mut out = Vec::new();
        converter.process(&input, &mut out).expect("process");
        converter.flush(&mut out).expect("flush");

        let ratio = out.len() as f64 / input.len() as f64;
        assert!(
            (ratio - 2.0).abs() < 0.2,
            "unexpected output ratio: {}",
            ratio
        );
    }

    #[test]
    fn test_invalid_rate() {
        assert!(RateConverter::new(2, 0.0, Quality::Low).is_err());
        assert!(RateConverter::new(2, -1.0, Quality::Low).is_err());
    }
}
