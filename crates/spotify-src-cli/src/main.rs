//! spotify-src: drive the spotify source element from the command line.
//!
//! The element is wired to the in-process loopback client, so the whole source path
//! (session start, delivery bridge, frame queue, pull loop, seek and stop) runs
//! without a network service. Pulled buffers go either to an output device via CPAL
//! (`play`) or to a raw S16LE file (`dump`).

mod cli;
mod device;
mod playback;
mod runtime;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use spotify_src::SpotifySrc;
use spotify_src::config::{SourceConfigFile, SourceSettings};
use spotify_src::format::{OUTPUT_CHANNELS, OUTPUT_RATE};
use spotify_src::loopback::{LoopbackClient, LoopbackTrack};
use spotify_src::uri::SpotifyUri;
use tracing_subscriber::EnvFilter;

/// Blocks buffered between the pull loop and the output callback.
const PLAYBACK_QUEUE_BLOCKS: usize = 32;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,spotify_src=info")
        }))
        .init();

    let uri = match &args.cmd {
        cli::Command::Play { uri, .. } | cli::Command::Dump { uri, .. } => uri.clone(),
        cli::Command::ListDevices => return device::list_devices(&cpal::default_host()),
    };
    let settings = load_settings(&args, uri.as_deref())?;

    let client = LoopbackClient::new().with_track(
        settings.uri.location(),
        LoopbackTrack::tone(Duration::from_secs_f32(args.track_seconds.max(0.0)), args.tone_hz),
    );
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let src = Arc::new(SpotifySrc::with_events(Arc::new(client), settings, events_tx));
    let logger = runtime::spawn_event_logger(events_rx)?;

    let cancel = Arc::new(AtomicBool::new(false));
    runtime::install_ctrlc(&src, cancel.clone())?;

    let summary = match &args.cmd {
        cli::Command::Play { device, seek_ms, .. } => play(
            &src,
            device.as_deref(),
            seek_ms.map(Duration::from_millis),
            &cancel,
        )?,
        cli::Command::Dump { output, .. } => dump(&src, output, &cancel)?,
        cli::Command::ListDevices => return Ok(()),
    };

    tracing::info!(
        buffers = summary.buffers,
        bytes = summary.bytes,
        position_ms = summary.position.as_millis() as u64,
        "done"
    );
    if args.status_json {
        println!("{}", serde_json::to_string_pretty(&summary.status)?);
    }

    drop(src);
    if logger.join().is_err() {
        tracing::warn!("event logger panicked");
    }
    Ok(())
}

/// Environment defaults, then the config file, then command-line flags.
fn load_settings(args: &cli::Args, uri: Option<&str>) -> Result<SourceSettings> {
    let mut settings = SourceSettings::from_env();
    if let Some(path) = &args.config {
        let file = SourceConfigFile::load(path)?;
        settings.apply_file(&file)?;
    }
    if let Some(user) = &args.user {
        settings.user = Some(user.clone());
    }
    if let Some(pass) = &args.pass {
        settings.pass = Some(pass.clone());
    }
    if let Some(appkey) = &args.appkey {
        settings.appkey_file = Some(appkey.clone());
    }
    if let Some(max_bytes) = args.max_bytes {
        settings.max_bytes = max_bytes;
    }
    if let Some(uri) = uri {
        settings.uri = SpotifyUri::parse(uri).with_context(|| format!("parse uri {uri}"))?;
    }
    Ok(settings)
}

fn play(
    src: &Arc<SpotifySrc>,
    needle: Option<&str>,
    seek: Option<Duration>,
    cancel: &AtomicBool,
) -> Result<runtime::PullSummary> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, needle)?;
    let config = device::pick_output_config(&device, OUTPUT_RATE, OUTPUT_CHANNELS)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }
    tracing::info!(
        device = %device.description()?,
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        "output device"
    );

    let (tx, rx) = crossbeam_channel::bounded::<Vec<i16>>(PLAYBACK_QUEUE_BLOCKS);
    let counters = Arc::new(playback::PlaybackCounters::default());
    let stream = playback::build_output_stream(
        &device,
        &stream_config,
        config.sample_format(),
        rx,
        counters.clone(),
    )?;
    stream.play()?;

    let summary = runtime::run_pull_loop(src, seek, cancel, |buffer| {
        tx.send(playback::le_bytes_to_samples(&buffer.data))
            .context("playback stream closed")
    })?;

    // Let the device play out what is still queued.
    while !tx.is_empty() && !cancel.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);

    tracing::info!(
        played_frames = counters.played_frames.load(Ordering::Relaxed),
        underrun_events = counters.underrun_events.load(Ordering::Relaxed),
        underrun_frames = counters.underrun_frames.load(Ordering::Relaxed),
        "playback finished"
    );
    Ok(summary)
}

fn dump(
    src: &Arc<SpotifySrc>,
    output: &std::path::Path,
    cancel: &AtomicBool,
) -> Result<runtime::PullSummary> {
    let file = File::create(output).with_context(|| format!("create {:?}", output))?;
    let mut writer = BufWriter::new(file);
    let summary = runtime::run_pull_loop(src, None, cancel, |buffer| {
        writer
            .write_all(&buffer.data)
            .with_context(|| format!("write {:?}", output))
    })?;
    writer
        .flush()
        .with_context(|| format!("flush {:?}", output))?;
    tracing::info!(path = ?output, caps = %spotify_src::format::AudioCaps::output(), "raw audio written");
    Ok(summary)
}
