//! Synchronous command façade over the asynchronous streaming client.
//!
//! A [`Session`] owns the client session handle and a background event thread that
//! pumps [`ClientSession::process_events`]. Commands that complete asynchronously
//! (login, track metadata) block the caller on the [`SessionState`] condvar until the
//! matching callback lands, the deadline passes, or the wait is cancelled.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::client::{ClientError, ClientSession, ClientTrack, SessionConfig, SessionEvents, StreamingClient};

/// Exact size of the application key blob.
pub const APPLICATION_KEY_SIZE: usize = 321;

/// Next-pump delay used when `process_events` fails.
const EVENT_RETRY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Backstop re-check interval while waiting for track metadata.
const TRACK_LOAD_POLL: Duration = Duration::from_millis(50);

/// Failures of session commands.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("read application key {path:?}")]
    ApplicationKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("application key {path:?} is shorter than {expected} bytes")]
    ApplicationKeyTooShort { path: PathBuf, expected: usize },
    #[error("{op} failed")]
    Client {
        op: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("spawn session event thread")]
    Spawn(#[source] io::Error),
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("{op} cancelled")]
    Cancelled { op: &'static str },
    #[error("logged out during {op}")]
    LoggedOut { op: &'static str },
    #[error("session destroyed")]
    Destroyed,
}

/// Options for creating and driving a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub appkey_file: PathBuf,
    pub cache_location: PathBuf,
    pub settings_location: PathBuf,
    pub user_agent: String,
    /// Upper bound for a login round-trip.
    pub login_timeout: Duration,
    /// Upper bound for track metadata to arrive.
    pub load_timeout: Duration,
}

/// Flags updated by client callbacks and read by the façade.
#[derive(Clone, Debug, Default)]
pub struct SessionFlags {
    pub logged_in: bool,
    pub logged_out: bool,
    pub login_error: Option<ClientError>,
    pub play_token_lost: bool,
    pub end_of_track: bool,
    pub destroy_requested: bool,
    pub cancelled: bool,
    /// Set by `notify_main_thread`, consumed by the event thread.
    pub notified: bool,
    /// Bumped on every metadata update.
    pub metadata_generation: u64,
    pub connection_error: Option<ClientError>,
    pub streaming_error: Option<ClientError>,
}

/// Per-session flags guarded by their own mutex, plus the condvar every session
/// waiter (event thread, login, track load) sleeps on.
#[derive(Debug, Default)]
pub struct SessionState {
    flags: Mutex<SessionFlags>,
    cv: Condvar,
}

impl SessionState {
    /// Create a shared, mutex-protected session state.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SessionFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` under the lock and wake every waiter.
    pub fn update(&self, f: impl FnOnce(&mut SessionFlags)) {
        let mut g = self.lock();
        f(&mut g);
        drop(g);
        self.cv.notify_all();
    }

    /// Copy of the current flags.
    pub fn snapshot(&self) -> SessionFlags {
        self.lock().clone()
    }

    /// Wake the event thread early.
    pub fn notify(&self) {
        self.update(|f| f.notified = true);
    }

    /// Abort any in-flight login or track-load wait.
    pub fn cancel(&self) {
        self.update(|f| f.cancelled = true);
    }

    pub fn on_logged_in(&self, result: Result<(), ClientError>) {
        self.update(|f| match result {
            Ok(()) => {
                f.logged_in = true;
                f.login_error = None;
            }
            Err(e) => {
                f.logged_in = false;
                f.login_error = Some(e);
            }
        });
    }

    pub fn on_logged_out(&self) {
        self.update(|f| {
            f.logged_in = false;
            f.logged_out = true;
        });
    }

    pub fn on_metadata_updated(&self) {
        self.update(|f| f.metadata_generation = f.metadata_generation.wrapping_add(1));
    }

    pub fn on_connection_error(&self, error: ClientError) {
        self.update(|f| f.connection_error = Some(error));
    }

    pub fn on_streaming_error(&self, error: ClientError) {
        self.update(|f| f.streaming_error = Some(error));
    }

    pub fn on_play_token_lost(&self) {
        self.update(|f| f.play_token_lost = true);
    }

    pub fn on_end_of_track(&self) {
        self.update(|f| f.end_of_track = true);
    }

    /// Block until `check` yields a result, `deadline` passes (`Ok(None)`), or the
    /// session is cancelled or destroyed.
    fn wait_until<T>(
        &self,
        op: &'static str,
        deadline: Instant,
        mut check: impl FnMut(&mut SessionFlags) -> Option<Result<T, SessionError>>,
    ) -> Result<Option<T>, SessionError> {
        let mut g = self.lock();
        loop {
            if let Some(result) = check(&mut g) {
                return result.map(Some);
            }
            if g.cancelled {
                return Err(SessionError::Cancelled { op });
            }
            if g.destroy_requested {
                return Err(SessionError::Destroyed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }
}

/// Read the application key blob, requiring exactly [`APPLICATION_KEY_SIZE`] bytes.
///
/// Extra trailing bytes are ignored.
pub fn read_application_key(path: &Path) -> Result<Vec<u8>, SessionError> {
    let mut file = File::open(path).map_err(|source| SessionError::ApplicationKey {
        path: path.to_path_buf(),
        source,
    })?;
    let mut key = vec![0u8; APPLICATION_KEY_SIZE];
    match file.read_exact(&mut key) {
        Ok(()) => Ok(key),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(SessionError::ApplicationKeyTooShort {
                path: path.to_path_buf(),
                expected: APPLICATION_KEY_SIZE,
            })
        }
        Err(source) => Err(SessionError::ApplicationKey {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A live client session with its event thread.
pub struct Session {
    state: Arc<SessionState>,
    client: Arc<dyn ClientSession>,
    api: Arc<Mutex<()>>,
    thread: Option<JoinHandle<()>>,
    track: Option<Arc<dyn ClientTrack>>,
    options: SessionOptions,
    released: bool,
}

impl Session {
    /// Read the application key, create the client session reporting to `events`, and
    /// start the event thread.
    ///
    /// On failure nothing is left running: a created client session is released
    /// before the error is returned.
    pub fn create(
        client: &dyn StreamingClient,
        options: &SessionOptions,
        state: Arc<SessionState>,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Self, SessionError> {
        tracing::debug!(appkey_file = ?options.appkey_file, "creating session");
        let application_key = read_application_key(&options.appkey_file)?;

        let config = SessionConfig {
            application_key,
            cache_location: options.cache_location.clone(),
            settings_location: options.settings_location.clone(),
            user_agent: options.user_agent.clone(),
            compress_playlists: false,
            dont_save_metadata_for_playlists: false,
        };

        let session = client
            .create_session(&config, events)
            .map_err(|source| SessionError::Client {
                op: "create session",
                source,
            })?;

        let api = Arc::new(Mutex::new(()));
        let thread = {
            let state = state.clone();
            let session = session.clone();
            let api = api.clone();
            std::thread::Builder::new()
                .name("spotify-events".to_string())
                .spawn(move || run_event_loop(state, session, api))
        };
        let thread = match thread {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("event thread spawn failed: {e}");
                if let Err(re) = session.release() {
                    tracing::warn!("session release after spawn failure: {re}");
                }
                return Err(SessionError::Spawn(e));
            }
        };

        Ok(Self {
            state,
            client: session,
            api,
            thread: Some(thread),
            track: None,
            options: options.clone(),
            released: false,
        })
    }

    /// Shared flags of this session.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Run one serialized call into the client.
    fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn ClientSession) -> Result<T, ClientError>,
    ) -> Result<T, SessionError> {
        let _api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        f(self.client.as_ref()).map_err(|source| {
            tracing::debug!(op, error = %source, "client call failed");
            SessionError::Client { op, source }
        })
    }

    /// Log in and wait for the login-result callback.
    pub fn login(&self, user: &str, password: &str) -> Result<(), SessionError> {
        const OP: &str = "login";
        self.state.update(|f| {
            f.logged_in = false;
            f.logged_out = false;
            f.login_error = None;
        });
        tracing::debug!(user, "attempting to login");
        self.call(OP, |c| c.login(user, password))?;

        let timeout = self.options.login_timeout;
        let deadline = Instant::now() + timeout;
        let result = self.state.wait_until(OP, deadline, |f| {
            if f.logged_in {
                return Some(Ok(()));
            }
            if let Some(source) = f.login_error.take() {
                return Some(Err(SessionError::Client { op: OP, source }));
            }
            if f.logged_out {
                return Some(Err(SessionError::LoggedOut { op: OP }));
            }
            None
        })?;
        match result {
            Some(()) => {
                tracing::info!(user, "logged in");
                Ok(())
            }
            None => Err(SessionError::Timeout {
                op: OP,
                after: timeout,
            }),
        }
    }

    /// Resolve `link`, wait for its metadata, load it and start playback.
    ///
    /// Returns the track duration when the client knows it.
    pub fn play(&mut self, link: &str) -> Result<Option<Duration>, SessionError> {
        tracing::debug!(link, "attempting to load link");
        let track = self.call("resolve link", |c| c.resolve_track(link))?;

        tracing::debug!(link, "waiting for track to load");
        self.wait_track_loaded(&track)?;
        tracing::debug!(link, "track is loaded");

        self.call("player load", |c| c.player_load(&track))?;
        let duration = {
            let _api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
            track.duration()
        };
        self.call("player play", |c| c.player_play(true))?;

        self.state.update(|f| f.end_of_track = false);
        self.track = Some(track);
        tracing::info!(link, duration_ms = ?duration.map(|d| d.as_millis() as u64), "playing");
        Ok(duration)
    }

    fn wait_track_loaded(&self, track: &Arc<dyn ClientTrack>) -> Result<(), SessionError> {
        const OP: &str = "track load";
        let timeout = self.options.load_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let loaded = {
                let _api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
                track.is_loaded()
            };
            if loaded {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout { op: OP, after: timeout });
            }
            let seen = self.state.snapshot().metadata_generation;
            let poll_deadline = (Instant::now() + TRACK_LOAD_POLL).min(deadline);
            self.state.wait_until(OP, poll_deadline, |f| {
                (f.metadata_generation != seen).then_some(Ok(()))
            })?;
        }
    }

    /// Seek the playing track.
    pub fn seek(&self, offset: Duration) -> Result<(), SessionError> {
        tracing::debug!(offset_ms = offset.as_millis() as u64, "attempting to seek");
        self.call("seek", |c| c.player_seek(offset))
    }

    /// Pause and unload the player, dropping the track reference.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        tracing::debug!("attempting to stop player");
        self.call("player pause", |c| c.player_play(false))?;
        self.call("player unload", |c| c.player_unload())?;
        self.track = None;
        Ok(())
    }

    /// Stop the event thread and release the client session.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn destroy(&mut self) -> Result<(), SessionError> {
        if self.released {
            return Ok(());
        }
        tracing::debug!("destroying session");
        self.state.update(|f| f.destroy_requested = true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("session event thread panicked");
            }
        }
        self.track = None;
        self.released = true;
        self.call("release session", |c| c.release())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!("session release on drop failed: {e}");
        }
    }
}

/// Event thread body: pump the client, then sleep until its next deadline or an early
/// wake from `notify_main_thread` or destroy.
fn run_event_loop(state: Arc<SessionState>, client: Arc<dyn ClientSession>, api: Arc<Mutex<()>>) {
    tracing::debug!("session event thread started");
    loop {
        if state.lock().destroy_requested {
            break;
        }

        let timeout = {
            let _api = api.lock().unwrap_or_else(PoisonError::into_inner);
            match client.process_events() {
                Ok(next) => next,
                Err(e) => {
                    tracing::debug!(error = %e, "process events failed");
                    EVENT_RETRY_TIMEOUT
                }
            }
        };
        tracing::trace!(next_timeout_ms = timeout.as_millis() as u64, "processed events");

        let mut g = state.lock();
        if !g.destroy_requested && !g.notified {
            let (ng, _timeout) = state
                .cv
                .wait_timeout(g, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        g.notified = false;
    }
    tracing::debug!("session event thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackBehavior, LoopbackClient, LoopbackTrack};
    use crate::queue::FrameQueue;
    use crate::delivery::DeliveryBridge;
    use crate::events::EventBus;
    use crate::state::StateMachine;
    use crate::test_support::{temp_appkey, temp_file_with};

    const LINK: &str = "spotify:track:27jdUE1EYDSXZqhjuNxLem";

    fn options(appkey: &Path) -> SessionOptions {
        SessionOptions {
            appkey_file: appkey.to_path_buf(),
            cache_location: std::env::temp_dir(),
            settings_location: std::env::temp_dir(),
            user_agent: "spotify-src-test".to_string(),
            login_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(5),
        }
    }

    fn create(client: &LoopbackClient, opts: &SessionOptions) -> Result<(Session, Arc<FrameQueue>), SessionError> {
        let state = SessionState::shared();
        let queue = Arc::new(FrameQueue::new(0));
        let bridge = Arc::new(DeliveryBridge::new(
            queue.clone(),
            state.clone(),
            Arc::new(StateMachine::new()),
            EventBus::default(),
        ));
        Session::create(client, opts, state, bridge).map(|s| (s, queue))
    }

    #[test]
    fn read_application_key_requires_full_blob() {
        let short = temp_file_with("short-key", &[7u8; 100]).unwrap();
        match read_application_key(&short) {
            Err(SessionError::ApplicationKeyTooShort { expected, .. }) => {
                assert_eq!(expected, APPLICATION_KEY_SIZE)
            }
            other => panic!("unexpected {other:?}"),
        }

        let long = temp_file_with("long-key", &[9u8; 400]).unwrap();
        let key = read_application_key(&long).unwrap();
        assert_eq!(key.len(), APPLICATION_KEY_SIZE);
    }

    #[test]
    fn read_application_key_missing_file() {
        let path = std::env::temp_dir().join("spotify-src-test-does-not-exist.key");
        assert!(matches!(
            read_application_key(&path),
            Err(SessionError::ApplicationKey { .. })
        ));
    }

    #[test]
    fn create_failure_releases_nothing_and_reports_client_error() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::with_behavior(LoopbackBehavior {
            reject_application_key: true,
            ..LoopbackBehavior::default()
        });
        let err = create(&client, &options(&key)).err().expect("create must fail");
        assert!(matches!(
            err,
            SessionError::Client {
                source: ClientError::BadApplicationKey,
                ..
            }
        ));
        assert_eq!(client.probe().sessions_created(), 0);
    }

    #[test]
    fn login_play_stop_destroy_round_trip() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::new().with_track(
            LINK,
            LoopbackTrack::tone(Duration::from_secs(2), 440.0),
        );
        let (mut session, queue) = create(&client, &options(&key)).unwrap();

        session.login("user", "secret").unwrap();
        assert!(session.state().snapshot().logged_in);

        let duration = session.play(LINK).unwrap();
        assert_eq!(duration, Some(Duration::from_secs(2)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.queued_bytes() == 0 {
            assert!(Instant::now() < deadline, "no audio delivered");
            std::thread::sleep(Duration::from_millis(2));
        }

        session.stop().unwrap();
        session.destroy().unwrap();
        session.destroy().unwrap();
        assert_eq!(client.probe().sessions_released(), 1);
    }

    #[test]
    fn login_rejected_surfaces_client_error() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::with_behavior(LoopbackBehavior {
            user: Some("alice".to_string()),
            password: Some("pw".to_string()),
            ..LoopbackBehavior::default()
        });
        let (session, _queue) = create(&client, &options(&key)).unwrap();
        let err = session.login("alice", "wrong").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Client {
                source: ClientError::BadCredentials,
                ..
            }
        ));
    }

    #[test]
    fn track_load_times_out() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::with_behavior(LoopbackBehavior {
            never_load: true,
            ..LoopbackBehavior::default()
        })
        .with_track(LINK, LoopbackTrack::tone(Duration::from_secs(1), 440.0));
        let mut opts = options(&key);
        opts.load_timeout = Duration::from_millis(100);
        let (mut session, _queue) = create(&client, &opts).unwrap();
        session.login("user", "pw").unwrap();

        let started = Instant::now();
        let err = session.play(LINK).unwrap_err();
        assert!(matches!(err, SessionError::Timeout { op: "track load", .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn cancel_aborts_track_load_wait() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::with_behavior(LoopbackBehavior {
            never_load: true,
            ..LoopbackBehavior::default()
        })
        .with_track(LINK, LoopbackTrack::tone(Duration::from_secs(1), 440.0));
        let (mut session, _queue) = create(&client, &options(&key)).unwrap();
        session.login("user", "pw").unwrap();

        let state = session.state().clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            state.cancel();
        });
        let err = session.play(LINK).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, SessionError::Cancelled { .. }));
    }

    #[test]
    fn seek_is_forwarded() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::new()
            .with_track(LINK, LoopbackTrack::tone(Duration::from_secs(10), 440.0));
        let (mut session, _queue) = create(&client, &options(&key)).unwrap();
        session.login("user", "pw").unwrap();
        session.play(LINK).unwrap();
        session.seek(Duration::from_secs(3)).unwrap();
        assert_eq!(client.probe().seeks(), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn seek_without_track_fails() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::new();
        let (session, _queue) = create(&client, &options(&key)).unwrap();
        assert!(matches!(
            session.seek(Duration::from_secs(1)),
            Err(SessionError::Client {
                source: ClientError::NoTrackLoaded,
                ..
            })
        ));
    }

    #[test]
    fn drop_releases_session() {
        let key = temp_appkey().unwrap();
        let client = LoopbackClient::new();
        {
            let (_session, _queue) = create(&client, &options(&key)).unwrap();
        }
        assert_eq!(client.probe().sessions_released(), 1);
    }
}
