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
mod device;
mod format;
mod play;
mod playsync;
mod pool;
mod priority;
mod queue;
mod rate;
mod record;
mod render;
mod sink;
mod source;
#[cfg(test)]
mod testutil;
mod util;

use std::error::Error;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};

use crate::play::PlayOptions;
use crate::rate::Quality;
use crate::record::RecordOptions;
use crate::render::RenderOptions;
use crate::sink::FileEncoding;
use crate::source::PacketSource;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Buffered audio file playback, capture, and offline rendering."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plays an audio file through an output device.
    Play {
        /// The audio file to play.
        file: PathBuf,
        /// Playback volume.
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
        /// Stop playback after this long (e.g. "30s", "1m30s", or seconds).
        #[arg(short, long)]
        time: Option<String>,
        /// Playback rate. 2.0 plays twice as fast.
        #[arg(short, long, default_value_t = 1.0)]
        rate: f64,
        /// Resampling quality for rates other than 1.0 (low or high).
        #[arg(short, long, default_value = "low")]
        quality: Quality,
        /// The output device to play through. Defaults to the system default.
        #[arg(long)]
        device: Option<String>,
        /// Print the resolved stream format before playing.
        #[arg(short = 'd', long)]
        debug: bool,
    },
    /// Records from an input device to a WAV file.
    Record {
        /// The WAV file to record to. An existing file is overwritten.
        file: PathBuf,
        /// Number of channels to capture.
        #[arg(short, long, default_value_t = 2)]
        channels: u16,
        /// Sample encoding (int16, int24, int32, float32, or a four-char
        /// code like lpcm).
        #[arg(short = 'd', long, default_value = "int16")]
        format: FileEncoding,
        /// Capture sample rate. Defaults to the device's default rate.
        #[arg(short = 'r', long)]
        sample_rate: Option<u32>,
        /// Stop recording after this long. Without it, recording runs until
        /// return is pressed.
        #[arg(short = 's', long)]
        seconds: Option<String>,
        /// The input device to record from. Defaults to the system default.
        #[arg(long)]
        device: Option<String>,
    },
    /// Decodes an audio file offline to a 16-bit PCM WAV file.
    Render {
        /// The audio file to decode.
        input: PathBuf,
        /// The WAV file to write.
        output: PathBuf,
        /// Gain applied to the decoded audio.
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
    },
    /// Lists the available audio output and input devices.
    Devices {},
    /// Prints the resolved stream format of an audio file.
    Probe {
        /// The audio file to probe.
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            file,
            volume,
            time,
            rate,
            quality,
            device,
            debug,
        } => {
            let time_limit = match time {
                Some(time) => Some(util::parse_duration(&time)?),
                None => None,
            };
            play::play(
                &file,
                PlayOptions {
                    volume,
                    time_limit,
                    rate,
                    quality,
                    device,
                    show_format: debug,
                },
            )?;
        }
        Commands::Record {
            file,
            channels,
            format,
            sample_rate,
            seconds,
            device,
        } => {
            let duration = match seconds {
                Some(seconds) => Some(util::parse_duration(&seconds)?),
                None => None,
            };
            record::record(
                &file,
                RecordOptions {
                    channels,
                    encoding: format,
                    sample_rate,
                    duration,
                    device,
                },
            )?;
        }
        Commands::Render {
            input,
            output,
            volume,
        } => {
            render::render(&input, &output, RenderOptions { volume })?;
        }
        Commands::Devices {} => {
            let outputs = device::list_outputs()?;
            let inputs = device::list_inputs()?;

            if outputs.is_empty() && inputs.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Output devices:");
            for device in outputs {
                println!("- {}", device);
            }
            println!("\nInput devices:");
            for device in inputs {
                println!("- {}", device);
            }
        }
        Commands::Probe { file } => {
            let source = PacketSource::open(&file)?;
            let format = source.stream_format();
            println!("{}: {}", util::filename_display(&file), format);
            if let Some(duration) = format.duration() {
                println!("duration: {}", util::duration_minutes_seconds(duration));
            }
        }
    }

    Ok(())
}
