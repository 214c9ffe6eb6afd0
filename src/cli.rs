use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::render::palette::Palette;

#[derive(Parser, Debug)]
#[command(name = "pcmscope", about = "Spectrum, level and pitch analyzer for framed serial PCM")]
pub struct Cli {
    /// Config file (defaults to ./pcmscope.toml or ~/.config/pcmscope/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode framed PCM from a serial device, a dump file or stdin (`-`)
    Serial {
        /// Device node or file; `-` reads stdin
        input: PathBuf,

        /// Sample rate the producer was configured with
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Accept packets whose CRC does not match
        #[arg(long)]
        no_crc: bool,

        /// Reopen the device when it closes (unplug, writer gone) and start over
        #[arg(long)]
        reconnect: bool,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Analyze an audio file (WAV, MP3, FLAC, OGG)
    Capture {
        input: PathBuf,

        /// Samples per frame handed to the analyzer
        #[arg(long)]
        block_size: Option<usize>,

        /// Feed frames at the file's own pace and render on the fps ticker
        #[arg(long, conflicts_with = "offline")]
        realtime: bool,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Encode an audio file into the serial wire format
    Pack {
        input: PathBuf,
        output: PathBuf,

        /// Samples per packet
        #[arg(long)]
        block_size: Option<usize>,
    },
}

#[derive(Args, Debug, Default)]
pub struct AnalysisArgs {
    /// FFT size (power of two)
    #[arg(long)]
    pub fft_size: Option<usize>,

    /// Number of quadratic bands
    #[arg(long)]
    pub bands: Option<usize>,

    /// Ticks (and video frames) per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Write one JSON tick report per line to stdout
    #[arg(long)]
    pub json: bool,

    /// Render the bars and waterfall to a video file
    #[arg(long)]
    pub video: Option<PathBuf>,

    /// Waterfall color palette
    #[arg(long, value_enum)]
    pub palette: Option<Palette>,

    /// Analyze every frame as it arrives instead of one per tick
    #[arg(long)]
    pub offline: bool,
}

impl AnalysisArgs {
    /// CLI values win over the config file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(fft_size) = self.fft_size {
            config.analysis.fft_size = fft_size;
        }
        if let Some(bands) = self.bands {
            config.analysis.bands = bands;
        }
        if let Some(fps) = self.fps {
            config.render.fps = fps;
        }
        if let Some(palette) = self.palette {
            config.render.palette = palette;
        }
    }
}
