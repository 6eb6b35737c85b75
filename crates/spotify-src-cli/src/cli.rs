use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "spotify-src", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML settings file (values override SPOTIFY_* environment defaults)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Account user name (default: $SPOTIFY_USER)
    #[arg(long)]
    pub user: Option<String>,

    /// Account password (default: $SPOTIFY_PASS)
    #[arg(long)]
    pub pass: Option<String>,

    /// Application key file (default: $SPOTIFY_APPKEY)
    #[arg(long)]
    pub appkey: Option<PathBuf>,

    /// Frame queue capacity in bytes (0 = unbounded)
    #[arg(long)]
    pub max_bytes: Option<u64>,

    /// Length of the generated loopback track in seconds
    #[arg(long, default_value_t = 10.0)]
    pub track_seconds: f32,

    /// Frequency of the generated loopback tone in Hz
    #[arg(long, default_value_t = 440.0)]
    pub tone_hz: f32,

    /// Print the element status as JSON when done
    #[arg(long)]
    pub status_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a spotify:// URI on an output device
    Play {
        /// Track URI, e.g. spotify://spotify:track:<id>
        uri: Option<String>,

        /// Use a specific output device by substring match
        #[arg(long)]
        device: Option<String>,

        /// Seek to this offset (milliseconds) right after starting
        #[arg(long)]
        seek_ms: Option<u64>,
    },

    /// Write the raw S16LE stereo 44.1 kHz stream to a file
    Dump {
        /// Output file
        output: PathBuf,

        /// Track URI, e.g. spotify://spotify:track:<id>
        #[arg(long)]
        uri: Option<String>,
    },

    /// List output devices and exit
    ListDevices,
}
