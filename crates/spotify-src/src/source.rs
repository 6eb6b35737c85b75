//! The source element: lifecycle commands and the pull loop.
//!
//! [`SpotifySrc`] ties the pieces together for a host pipeline:
//! - `start` creates a session reporting to a [`DeliveryBridge`], logs in and plays
//!   the configured track
//! - `create` pulls one buffer from the [`FrameQueue`], blocking until data, flush,
//!   end of stream or a fatal error
//! - `do_seek`, `unlock`, `unlock_stop` and `stop` drive flushing and the session
//!
//! Hosts call lifecycle commands from one thread and `create` from the pull thread;
//! `unlock` may come from any thread to release a blocked pull or an in-flight start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::Sender;
use spotify_src_types::{SourceState, SourceStatus};

use crate::client::StreamingClient;
use crate::config::SourceSettings;
use crate::delivery::DeliveryBridge;
use crate::events::{EventBus, SourceEvent};
use crate::format::AudioCaps;
use crate::queue::{Dequeued, FrameBuffer, FrameQueue};
use crate::session::{Session, SessionError, SessionState};
use crate::state::{StateMachine, Transition};
use crate::status::StatusSources;
use crate::uri::{SpotifyUri, UriError};

/// Why `start` failed. The element is back in `Stopped` afterwards.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("cannot start while {0:?}")]
    InvalidState(SourceState),
    #[error("no application key file configured")]
    MissingApplicationKey,
    #[error("no user name or password configured")]
    MissingCredentials,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("start aborted while {0:?}")]
    Aborted(SourceState),
}

/// Non-buffer outcomes of a pull.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("flushing")]
    Flushing,
    #[error("end of stream")]
    Eos,
    #[error("{0}")]
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SeekError {
    #[error("no active session")]
    NotStarted,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Latency answer for the host's latency query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Latency {
    pub live: bool,
    pub min: Duration,
    pub max: Option<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pull-mode audio source backed by a streaming client session.
pub struct SpotifySrc {
    client: Arc<dyn StreamingClient>,
    settings: Mutex<SourceSettings>,
    queue: Arc<FrameQueue>,
    lifecycle: Arc<StateMachine>,
    session: Mutex<Option<Session>>,
    /// Flags of a session still being set up, so `unlock`/`stop` can cancel its waits.
    pending: Mutex<Option<Arc<SessionState>>>,
    /// Track duration reported by the session.
    size: Mutex<Option<Duration>>,
    /// Duration last announced through `DurationChanged`.
    reported_size: Mutex<Option<Duration>>,
    first_seek: AtomicBool,
    eos_posted: AtomicBool,
    bus: EventBus,
}

impl SpotifySrc {
    pub fn new(client: Arc<dyn StreamingClient>, settings: SourceSettings) -> Self {
        Self::build(client, settings, EventBus::default())
    }

    /// Create an element posting [`SourceEvent`]s to `events`.
    pub fn with_events(
        client: Arc<dyn StreamingClient>,
        settings: SourceSettings,
        events: Sender<SourceEvent>,
    ) -> Self {
        Self::build(client, settings, EventBus::new(Some(events)))
    }

    fn build(client: Arc<dyn StreamingClient>, settings: SourceSettings, bus: EventBus) -> Self {
        Self {
            client,
            queue: Arc::new(FrameQueue::new(settings.max_bytes)),
            settings: Mutex::new(settings),
            lifecycle: Arc::new(StateMachine::new()),
            session: Mutex::new(None),
            pending: Mutex::new(None),
            size: Mutex::new(None),
            reported_size: Mutex::new(None),
            first_seek: AtomicBool::new(true),
            eos_posted: AtomicBool::new(false),
            bus,
        }
    }

    fn transition(&self, transition: Transition) -> bool {
        match self.lifecycle.apply(transition) {
            Ok((from, to)) => {
                if from != to {
                    self.bus.post(SourceEvent::StateChanged { from, to });
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Move back to `Stopped` after a failed or aborted start.
    fn abort_start(&self) {
        if !self.transition(Transition::StartFailed) {
            self.transition(Transition::Stopped);
        }
        self.queue.set_started(false);
    }

    /// Create a session, log in and start playing the configured track.
    ///
    /// Blocks until the track is playing, a wait times out, or `unlock`/`stop` cancels
    /// the attempt.
    pub fn start(&self) -> Result<(), StartError> {
        let settings = self.settings();
        match self.lifecycle.apply(Transition::StartRequested) {
            Ok((from, to)) => self.bus.post(SourceEvent::StateChanged { from, to }),
            Err(e) => return Err(StartError::InvalidState(e.from)),
        }
        tracing::debug!(uri = %settings.uri, "starting");

        self.queue.reset();
        self.queue.set_max_bytes(settings.max_bytes);
        self.first_seek.store(true, Ordering::SeqCst);
        self.eos_posted.store(false, Ordering::SeqCst);
        *lock(&self.size) = None;
        *lock(&self.reported_size) = None;

        let result = self.open_session(&settings);
        *lock(&self.pending) = None;
        let (session, duration) = match result {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(error = %e, "start failed");
                self.abort_start();
                return Err(e);
            }
        };

        *lock(&self.size) = duration;
        *lock(&self.session) = Some(session);
        if !self.transition(Transition::Started) {
            // A fatal callback or a concurrent stop got there first.
            let state = self.lifecycle.current();
            tracing::warn!(?state, "start aborted");
            let aborted = lock(&self.session).take();
            if let Some(mut session) = aborted {
                if let Err(e) = session.destroy() {
                    tracing::warn!("destroy aborted session: {e}");
                }
            }
            *lock(&self.size) = None;
            self.abort_start();
            return Err(StartError::Aborted(state));
        }
        if self.lifecycle.take_pending_end_of_track() {
            tracing::debug!("track ended while starting");
            self.transition(Transition::EndOfTrack);
        }
        self.queue.set_started(true);
        tracing::info!(uri = %settings.uri, "started");
        Ok(())
    }

    fn open_session(
        &self,
        settings: &SourceSettings,
    ) -> Result<(Session, Option<Duration>), StartError> {
        let options = settings
            .session_options()
            .ok_or(StartError::MissingApplicationKey)?;
        let (Some(user), Some(pass)) = (settings.user.as_deref(), settings.pass.as_deref()) else {
            return Err(StartError::MissingCredentials);
        };

        let state = SessionState::shared();
        *lock(&self.pending) = Some(state.clone());
        let bridge = Arc::new(DeliveryBridge::new(
            self.queue.clone(),
            state.clone(),
            self.lifecycle.clone(),
            self.bus.clone(),
        ));
        let mut session = Session::create(self.client.as_ref(), &options, state, bridge)?;
        session.login(user, pass)?;
        let duration = session.play(settings.uri.location())?;
        Ok((session, duration))
    }

    /// Pause and unload the player, flush the queue and destroy the session.
    pub fn stop(&self) {
        tracing::debug!("stopping");
        self.queue.set_flushing(true);
        self.queue.clear_end_of_stream();
        if let Some(state) = lock(&self.pending).take() {
            state.cancel();
        }

        let session = lock(&self.session).take();
        if let Some(mut session) = session {
            if let Err(e) = session.stop() {
                tracing::warn!("stop player: {e}");
            }
            self.queue.flush();
            if let Err(e) = session.destroy() {
                tracing::warn!("destroy session: {e}");
            }
        }

        self.queue.set_started(false);
        *lock(&self.size) = None;
        self.transition(Transition::Stopped);
    }

    /// Pull the next buffer, stamped with the output caps.
    pub fn create(&self) -> Result<FrameBuffer, FlowError> {
        self.update_duration();
        match self.queue.dequeue_blocking() {
            Dequeued::Buffer(mut buffer) => {
                buffer.caps.get_or_insert(AudioCaps::output());
                tracing::trace!(
                    size = buffer.size(),
                    pts_ms = buffer.pts.as_millis() as u64,
                    "we have buffer"
                );
                Ok(buffer)
            }
            Dequeued::Flushing => {
                tracing::debug!("we are flushing");
                Err(FlowError::Flushing)
            }
            Dequeued::EndOfStream => {
                if !self.eos_posted.swap(true, Ordering::SeqCst) {
                    tracing::debug!("we are EOS");
                    self.bus.post(SourceEvent::EndOfStream);
                }
                Err(FlowError::Eos)
            }
            Dequeued::Error(reason) => Err(FlowError::Error(reason)),
        }
    }

    fn update_duration(&self) {
        let size = *lock(&self.size);
        let mut reported = lock(&self.reported_size);
        if *reported != size {
            tracing::debug!(from = ?*reported, to = ?size, "size changed");
            *reported = size;
            drop(reported);
            self.bus.post(SourceEvent::DurationChanged(size));
        }
    }

    /// Release a blocked `create` and cancel an in-flight `start`.
    pub fn unlock(&self) {
        tracing::debug!("unlock start");
        self.queue.set_flushing(true);
        if let Some(state) = lock(&self.pending).as_ref() {
            state.cancel();
        }
    }

    /// Leave the flushing state entered by `unlock`.
    pub fn unlock_stop(&self) {
        tracing::debug!("unlock stop");
        self.queue.set_flushing(false);
    }

    /// Seek the playing track to `position`.
    ///
    /// On success queued data is dropped and the next buffer is stamped `position`.
    /// On failure queue, timestamps and lifecycle are left untouched.
    pub fn do_seek(&self, position: Duration) -> Result<(), SeekError> {
        // The client reports a decode error when seeked to zero before it delivered
        // any data, so the initial seek to the start is acknowledged locally.
        if position.is_zero() && self.first_seek.swap(false, Ordering::SeqCst) {
            tracing::debug!("skipping initial seek to start");
            return Ok(());
        }

        tracing::debug!(position_ms = position.as_millis() as u64, "seeking");
        // End of track reported from here on belongs to the new position.
        let eos_epoch = self.queue.end_of_stream_epoch();
        {
            let guard = lock(&self.session);
            let session = guard.as_ref().ok_or(SeekError::NotStarted)?;
            if let Err(e) = session.seek(position) {
                tracing::warn!("seek failed: {e}");
                return Err(e.into());
            }
        }

        tracing::debug!("flushing queue");
        let ended = self.queue.restart_at(position, eos_epoch);
        self.eos_posted.store(false, Ordering::SeqCst);
        if ended {
            tracing::debug!("track ended during seek");
        } else {
            self.transition(Transition::Seeked);
        }
        Ok(())
    }

    pub fn is_seekable(&self) -> bool {
        true
    }

    /// Track duration, once known.
    pub fn size(&self) -> Option<Duration> {
        *lock(&self.size)
    }

    pub fn query_latency(&self) -> Latency {
        Latency {
            live: false,
            min: Duration::ZERO,
            max: None,
        }
    }

    pub fn state(&self) -> SourceState {
        self.lifecycle.current()
    }

    /// Copy of the current settings.
    pub fn settings(&self) -> SourceSettings {
        lock(&self.settings).clone()
    }

    pub fn set_user(&self, user: Option<String>) {
        lock(&self.settings).user = user;
    }

    pub fn set_pass(&self, pass: Option<String>) {
        lock(&self.settings).pass = pass;
    }

    pub fn set_appkey_file(&self, path: Option<std::path::PathBuf>) {
        lock(&self.settings).appkey_file = path;
    }

    /// Change the queue capacity; applies immediately to a running element.
    pub fn set_max_bytes(&self, max_bytes: u64) {
        lock(&self.settings).max_bytes = max_bytes;
        self.queue.set_max_bytes(max_bytes);
    }

    pub fn uri(&self) -> SpotifyUri {
        lock(&self.settings).uri.clone()
    }

    /// Set the track URI. Only allowed while stopped.
    pub fn set_uri(&self, uri: &str) -> Result<(), UriError> {
        if self.lifecycle.current() != SourceState::Stopped {
            tracing::warn!(uri, "setting uri refused in current state");
            return Err(UriError::WrongState);
        }
        let parsed = SpotifyUri::parse(uri)?;
        tracing::debug!(uri, location = parsed.location(), "uri set");
        lock(&self.settings).uri = parsed;
        Ok(())
    }

    pub fn status(&self) -> SourceStatus {
        let uri = self.uri();
        let session = lock(&self.session)
            .as_ref()
            .map(|s| s.state().snapshot());
        StatusSources {
            uri: &uri,
            duration: self.size(),
            queue: &self.queue,
            lifecycle: &self.lifecycle,
            session,
        }
        .snapshot()
    }
}
