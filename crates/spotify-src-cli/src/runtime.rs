//! Pull loop driving a [`SpotifySrc`] the way a host pipeline would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Receiver;
use spotify_src::events::SourceEvent;
use spotify_src::queue::FrameBuffer;
use spotify_src::{FlowError, SpotifySrc};
use spotify_src_types::SourceStatus;

/// What a finished pull loop produced.
#[derive(Debug)]
pub struct PullSummary {
    pub buffers: u64,
    pub bytes: u64,
    /// End timestamp of the last buffer.
    pub position: Duration,
    /// Status captured just before the element was stopped.
    pub status: SourceStatus,
}

/// Start `src`, optionally seek, then pull until end of stream, a fatal error, or
/// `cancel` is raised. The element is always stopped before returning.
pub fn run_pull_loop(
    src: &SpotifySrc,
    seek: Option<Duration>,
    cancel: &AtomicBool,
    mut sink: impl FnMut(&FrameBuffer) -> Result<()>,
) -> Result<PullSummary> {
    src.start().context("start source")?;
    tracing::info!(uri = %src.uri(), duration = ?src.size(), "source started");

    let result = pull(src, seek, cancel, &mut sink);
    let status = src.status();
    src.stop();

    let (buffers, bytes, position) = result?;
    Ok(PullSummary {
        buffers,
        bytes,
        position,
        status,
    })
}

fn pull(
    src: &SpotifySrc,
    seek: Option<Duration>,
    cancel: &AtomicBool,
    sink: &mut impl FnMut(&FrameBuffer) -> Result<()>,
) -> Result<(u64, u64, Duration)> {
    if let Some(position) = seek {
        src.do_seek(position)
            .with_context(|| format!("seek to {position:?}"))?;
    }

    let (mut buffers, mut bytes, mut position) = (0u64, 0u64, Duration::ZERO);
    loop {
        match src.create() {
            Ok(buffer) => {
                sink(&buffer)?;
                buffers += 1;
                bytes += buffer.size() as u64;
                position = buffer.pts + buffer.duration;
            }
            Err(FlowError::Flushing) => {
                if cancel.load(Ordering::SeqCst) {
                    tracing::info!("cancelled");
                    break;
                }
                // Flushing without cancel: a concurrent unlock that will be lifted.
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(FlowError::Eos) => {
                tracing::info!(buffers, bytes, "end of stream");
                break;
            }
            Err(FlowError::Error(reason)) => {
                return Err(anyhow!("source failed: {reason}"));
            }
        }
    }
    Ok((buffers, bytes, position))
}

/// Log element events until every sender is gone.
pub fn spawn_event_logger(events: Receiver<SourceEvent>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("source-events".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    SourceEvent::StateChanged { from, to } => {
                        tracing::debug!(?from, ?to, "state changed")
                    }
                    SourceEvent::DurationChanged(duration) => {
                        tracing::info!(?duration, "duration")
                    }
                    SourceEvent::EndOfStream => tracing::debug!("end of stream posted"),
                    SourceEvent::Warning(message) => tracing::warn!("{message}"),
                    SourceEvent::Error(message) => tracing::error!("{message}"),
                }
            }
        })
        .context("spawn event logger")
}

/// Install a Ctrl-C handler that cancels the pull loop and releases a blocked pull.
///
/// The handler holds only a weak reference, so dropping the element still closes
/// its event channel.
pub fn install_ctrlc(src: &Arc<SpotifySrc>, cancel: Arc<AtomicBool>) -> Result<()> {
    let src = Arc::downgrade(src);
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
        if let Some(src) = src.upgrade() {
            src.unlock();
        }
    })
    .context("install Ctrl-C handler")
}
