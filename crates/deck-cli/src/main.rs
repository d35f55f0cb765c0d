//! deck — a small CLI front end for the `deck-player` playback core.
//!
//! Decodes the given file on a background thread, resamples it to the output
//! device rate, and plays it via CPAL, logging progress and transport events
//! until end of stream or Ctrl-C.

mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deck_player::config::PlayerConfig;
use deck_player::device;
use deck_player::engine::SymphoniaEngineFactory;
use deck_player::events::PlayerEvent;
use deck_player::player::Player;
use deck_player::sink::{CpalSinkBuilder, CpalSinkOptions};
use deck_player::source::MediaInput;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for (i, name) in device::list_output_devices(&host)?.iter().enumerate() {
            println!("#{i}: {name}");
        }
        return Ok(());
    }

    let Some(file) = args.file.clone() else {
        bail!("no input file given (see --help)");
    };

    let mut player = Player::new(
        PlayerConfig::default(),
        SymphoniaEngineFactory,
        CpalSinkBuilder::new(CpalSinkOptions {
            device: args.device.clone(),
            cpu_ids: args.cpus.clone(),
        }),
    );
    let events = player.events();

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    player.set_data_source(MediaInput::path(&file))?;
    player.prepare()?;
    player.set_looping(args.looping);
    if args.volume != 1.0 {
        player.set_volume(args.volume, args.volume);
    }
    if let Some(ms) = args.seek_ms {
        player.seek_to(ms)?;
    }
    player.start()?;

    tracing::info!(
        file = %file.display(),
        codec = player.stream_codec().as_deref().unwrap_or("unknown"),
        duration_ms = player.duration_ms(),
        "playing"
    );

    let mut failed = false;
    let mut last_logged_sec = -1i64;
    loop {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("interrupted; stopping");
            if let Err(e) = player.stop() {
                tracing::debug!("stop on shutdown: {e}");
            }
            break;
        }

        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(event) => {
                if args.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    tracing::info!(?event, "player event");
                }
                match event {
                    PlayerEvent::PlaybackComplete if !args.looping => break,
                    PlayerEvent::Error { .. } => {
                        failed = true;
                        break;
                    }
                    _ => {}
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                let pos = player.position_ms();
                if pos >= 0 && pos / 1000 != last_logged_sec {
                    last_logged_sec = pos / 1000;
                    tracing::info!(
                        position_ms = pos,
                        duration_ms = player.duration_ms(),
                        "progress"
                    );
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    player.release();
    if failed {
        bail!("playback failed; see events above");
    }
    Ok(())
}
