use std::path::PathBuf;

use clap::Parser;

/// Play an audio file through the default (or a named) output device.
#[derive(Parser, Debug)]
#[command(name = "deck", version)]
pub struct Args {
    /// Audio file to play.
    pub file: Option<PathBuf>,

    /// List available output devices and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Output device name substring (case-insensitive); default device if
    /// omitted.
    #[arg(long)]
    pub device: Option<String>,

    /// Seek to this position (milliseconds) before starting.
    #[arg(long)]
    pub seek_ms: Option<u64>,

    /// Restart from the beginning at end of stream.
    #[arg(long = "loop")]
    pub looping: bool,

    /// Playback gain applied to both channels.
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// Print player events as JSON lines instead of log records.
    #[arg(long)]
    pub json: bool,

    /// Pin the audio callback thread to these CPUs (comma-separated,
    /// performance hint).
    #[arg(long, value_delimiter = ',')]
    pub cpus: Vec<usize>,
}
