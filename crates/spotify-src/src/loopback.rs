//! In-process streaming client that plays generated tones.
//!
//! [`LoopbackClient`] implements the client traits without any network access. A
//! catalog maps track links to a duration and a sine frequency. Login and track
//! metadata complete on later event pumps, audio is delivered in fixed chunks that
//! honour partial acceptance, and knobs in [`LoopbackBehavior`] inject the failures a
//! real service produces.
//!
//! Callbacks are invoked from [`ClientSession::process_events`] (and, with
//! [`LoopbackBehavior::end_of_track_on_seek`], from `player_seek`), never while the
//! session's internal lock is held.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use spotify_src_types::BufferStats;

use crate::client::{
    ClientError, ClientSession, ClientTrack, SessionConfig, SessionEvents, StreamingClient,
};
use crate::format::{AudioFormat, OUTPUT_CHANNELS, OUTPUT_RATE};
use crate::session::APPLICATION_KEY_SIZE;

/// Error code returned when loading a track whose metadata has not arrived.
pub const ERROR_IS_LOADING: i32 = 17;

/// A catalog entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopbackTrack {
    pub duration: Duration,
    /// Tone frequency in Hz.
    pub frequency: f32,
    /// Peak amplitude in `0.0..=1.0`.
    pub amplitude: f32,
}

impl LoopbackTrack {
    pub fn tone(duration: Duration, frequency: f32) -> Self {
        Self {
            duration,
            frequency,
            amplitude: 0.25,
        }
    }

    pub fn silence(duration: Duration) -> Self {
        Self {
            duration,
            frequency: 0.0,
            amplitude: 0.0,
        }
    }

    fn total_frames(&self, rate: u32) -> u64 {
        (self.duration.as_secs_f64() * rate as f64).round() as u64
    }

    fn sample(&self, frame: u64, rate: u32) -> i16 {
        if self.amplitude == 0.0 || rate == 0 {
            return 0;
        }
        let phase = (frame as f64 * self.frequency as f64 / rate as f64).fract() as f32;
        ((phase * TAU).sin() * self.amplitude * i16::MAX as f32) as i16
    }
}

/// Failure injection and pacing knobs.
#[derive(Clone, Debug)]
pub struct LoopbackBehavior {
    /// Required user name; any name is accepted when `None`.
    pub user: Option<String>,
    /// Required password; any password is accepted when `None`.
    pub password: Option<String>,
    /// Event pumps before the login result is reported.
    pub login_pumps: u32,
    /// Event pumps before a resolved track's metadata arrives.
    pub load_pumps: u32,
    /// Never report track metadata.
    pub never_load: bool,
    /// Refuse every application key.
    pub reject_application_key: bool,
    /// Format reported with each delivery.
    pub format: AudioFormat,
    /// Frames per delivered chunk.
    pub chunk_frames: usize,
    /// Maximum chunks delivered per pump.
    pub chunks_per_pump: usize,
    /// Delay the client asks for between pumps.
    pub pump_interval: Duration,
    /// Report a streaming error after this many accepted chunks.
    pub streaming_error_after: Option<u64>,
    /// Report a lost play token after this many accepted chunks.
    pub play_token_lost_after: Option<u64>,
    /// Report a connection error after this many accepted chunks.
    pub connection_error_after: Option<u64>,
    /// Refuse every seek.
    pub fail_seek: bool,
    /// A seek jumps to the end of the track and reports end of track before
    /// `player_seek` returns.
    pub end_of_track_on_seek: bool,
}

impl Default for LoopbackBehavior {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            login_pumps: 1,
            load_pumps: 1,
            never_load: false,
            reject_application_key: false,
            format: AudioFormat {
                sample_rate: OUTPUT_RATE,
                channels: OUTPUT_CHANNELS,
            },
            chunk_frames: 2048,
            chunks_per_pump: 4,
            pump_interval: Duration::from_millis(5),
            streaming_error_after: None,
            play_token_lost_after: None,
            connection_error_after: None,
            fail_seek: false,
            end_of_track_on_seek: false,
        }
    }
}

#[derive(Debug, Default)]
struct ProbeInner {
    sessions_created: AtomicU64,
    sessions_released: AtomicU64,
    logins: AtomicU64,
    frames_delivered: AtomicU64,
    seeks: Mutex<Vec<Duration>>,
    last_stats: Mutex<Option<BufferStats>>,
}

/// Counters shared between a [`LoopbackClient`] and its sessions.
#[derive(Clone, Debug, Default)]
pub struct LoopbackProbe(Arc<ProbeInner>);

impl LoopbackProbe {
    pub fn sessions_created(&self) -> u64 {
        self.0.sessions_created.load(Ordering::Relaxed)
    }

    pub fn sessions_released(&self) -> u64 {
        self.0.sessions_released.load(Ordering::Relaxed)
    }

    pub fn logins(&self) -> u64 {
        self.0.logins.load(Ordering::Relaxed)
    }

    /// Frames the element accepted across all sessions.
    pub fn frames_delivered(&self) -> u64 {
        self.0.frames_delivered.load(Ordering::Relaxed)
    }

    /// Seek offsets issued, in order.
    pub fn seeks(&self) -> Vec<Duration> {
        self.0.seeks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stats returned by the most recent `buffer_stats` query.
    pub fn last_buffer_stats(&self) -> Option<BufferStats> {
        *self.0.last_stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process [`StreamingClient`].
#[derive(Clone, Debug, Default)]
pub struct LoopbackClient {
    behavior: LoopbackBehavior,
    catalog: HashMap<String, LoopbackTrack>,
    probe: LoopbackProbe,
}

impl LoopbackClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: LoopbackBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Add `track` to the catalog under `link`.
    pub fn with_track(mut self, link: &str, track: LoopbackTrack) -> Self {
        self.catalog.insert(link.to_string(), track);
        self
    }

    pub fn probe(&self) -> LoopbackProbe {
        self.probe.clone()
    }
}

impl StreamingClient for LoopbackClient {
    fn create_session(
        &self,
        config: &SessionConfig,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn ClientSession>, ClientError> {
        if self.behavior.reject_application_key
            || config.application_key.len() != APPLICATION_KEY_SIZE
        {
            return Err(ClientError::BadApplicationKey);
        }
        self.probe.0.sessions_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(user_agent = %config.user_agent, "loopback session created");
        Ok(Arc::new(LoopbackSession {
            behavior: self.behavior.clone(),
            catalog: self.catalog.clone(),
            probe: self.probe.clone(),
            events,
            sim: Mutex::new(Sim::default()),
        }))
    }
}

struct LoopbackTrackHandle {
    link: String,
    entry: Option<LoopbackTrack>,
    loaded: AtomicBool,
}

impl ClientTrack for LoopbackTrackHandle {
    fn link(&self) -> &str {
        &self.link
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn duration(&self) -> Option<Duration> {
        if !self.is_loaded() {
            return None;
        }
        self.entry.map(|t| t.duration)
    }
}

#[derive(Default)]
enum Login {
    #[default]
    Idle,
    Pending {
        pumps_left: u32,
        result: Result<(), ClientError>,
    },
    LoggedIn,
}

struct Player {
    track: LoopbackTrack,
    total_frames: u64,
    next_frame: u64,
    playing: bool,
    seek_marker: bool,
    ended: bool,
    halted: bool,
    accepted_chunks: u64,
}

#[derive(Default)]
struct Sim {
    login: Login,
    loading: Vec<(Arc<LoopbackTrackHandle>, u32)>,
    player: Option<Player>,
    /// Bumped whenever the player is replaced or repositioned.
    generation: u64,
    released: bool,
}

enum Notice {
    LoggedIn(Result<(), ClientError>),
    MetadataUpdated,
}

enum Step {
    Idle,
    SeekMarker,
    Chunk {
        generation: u64,
        samples: Vec<i16>,
        frames: usize,
    },
    EndOfTrack,
}

enum Fault {
    Streaming,
    TokenLost,
    Connection,
}

struct LoopbackSession {
    behavior: LoopbackBehavior,
    catalog: HashMap<String, LoopbackTrack>,
    probe: LoopbackProbe,
    events: Arc<dyn SessionEvents>,
    sim: Mutex<Sim>,
}

impl LoopbackSession {
    fn lock(&self) -> MutexGuard<'_, Sim> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut g = self.lock();

        let login = std::mem::take(&mut g.login);
        g.login = match login {
            Login::Pending { pumps_left: 0, result } => {
                let logged_in = result.is_ok();
                notices.push(Notice::LoggedIn(result));
                if logged_in { Login::LoggedIn } else { Login::Idle }
            }
            Login::Pending { pumps_left, result } => Login::Pending {
                pumps_left: pumps_left - 1,
                result,
            },
            other => other,
        };

        let mut loaded_any = false;
        g.loading.retain_mut(|(handle, pumps_left)| {
            if *pumps_left == 0 {
                handle.loaded.store(true, Ordering::Release);
                loaded_any = true;
                false
            } else {
                *pumps_left -= 1;
                true
            }
        });
        if loaded_any {
            notices.push(Notice::MetadataUpdated);
        }
        notices
    }

    fn next_step(&self) -> Step {
        let mut g = self.lock();
        let generation = g.generation;
        let Some(player) = g.player.as_mut() else {
            return Step::Idle;
        };
        if !player.playing || player.halted {
            return Step::Idle;
        }
        if player.seek_marker {
            player.seek_marker = false;
            return Step::SeekMarker;
        }
        if player.next_frame >= player.total_frames {
            if player.ended {
                return Step::Idle;
            }
            player.ended = true;
            return Step::EndOfTrack;
        }

        let rate = self.behavior.format.sample_rate;
        let channels = self.behavior.format.channels as usize;
        let remaining = player.total_frames - player.next_frame;
        let frames = (self.behavior.chunk_frames as u64).min(remaining) as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames as u64 {
            let s = player.track.sample(player.next_frame + i, rate);
            samples.extend(std::iter::repeat_n(s, channels));
        }
        Step::Chunk {
            generation,
            samples,
            frames,
        }
    }

    /// Advance the player by `accepted` frames and return any fault due to fire.
    fn accept(&self, generation: u64, accepted: usize) -> Option<Fault> {
        let mut g = self.lock();
        if g.generation != generation {
            return None;
        }
        let player = g.player.as_mut()?;
        player.next_frame = (player.next_frame + accepted as u64).min(player.total_frames);
        self.probe
            .0
            .frames_delivered
            .fetch_add(accepted as u64, Ordering::Relaxed);
        if accepted == 0 {
            return None;
        }
        player.accepted_chunks += 1;
        let n = player.accepted_chunks;
        if self.behavior.streaming_error_after == Some(n) {
            player.halted = true;
            return Some(Fault::Streaming);
        }
        if self.behavior.play_token_lost_after == Some(n) {
            player.playing = false;
            return Some(Fault::TokenLost);
        }
        if self.behavior.connection_error_after == Some(n) {
            return Some(Fault::Connection);
        }
        None
    }

    fn deliver(&self) {
        let format = self.behavior.format;
        for _ in 0..self.behavior.chunks_per_pump.max(1) {
            match self.next_step() {
                Step::Idle => break,
                Step::SeekMarker => {
                    self.events.music_delivery(&format, &[], 0);
                }
                Step::Chunk {
                    generation,
                    samples,
                    frames,
                } => {
                    let accepted = self.events.music_delivery(&format, &samples, frames).min(frames);
                    match self.accept(generation, accepted) {
                        Some(Fault::Streaming) => {
                            self.events
                                .streaming_error(ClientError::Network("stream interrupted".to_string()));
                            break;
                        }
                        Some(Fault::TokenLost) => {
                            self.events.play_token_lost();
                            break;
                        }
                        Some(Fault::Connection) => {
                            self.events
                                .connection_error(ClientError::Network("connection reset".to_string()));
                        }
                        None => {}
                    }
                    if accepted < frames {
                        break;
                    }
                }
                Step::EndOfTrack => {
                    self.events.end_of_track();
                    break;
                }
            }
        }
    }

    fn require_player(
        &self,
        f: impl FnOnce(&mut Sim) -> Result<(), ClientError>,
    ) -> Result<(), ClientError> {
        let mut g = self.lock();
        if g.player.is_none() {
            return Err(ClientError::NoTrackLoaded);
        }
        f(&mut g)
    }
}

impl ClientSession for LoopbackSession {
    fn process_events(&self) -> Result<Duration, ClientError> {
        if self.lock().released {
            return Ok(self.behavior.pump_interval);
        }
        for notice in self.tick() {
            match notice {
                Notice::LoggedIn(result) => {
                    self.events.logged_in(result);
                    self.events.userinfo_updated();
                }
                Notice::MetadataUpdated => self.events.metadata_updated(),
            }
        }
        self.deliver();

        let stats = self.events.buffer_stats();
        *self
            .probe
            .0
            .last_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stats);
        Ok(self.behavior.pump_interval)
    }

    fn login(&self, user: &str, password: &str) -> Result<(), ClientError> {
        self.probe.0.logins.fetch_add(1, Ordering::Relaxed);
        let user_ok = self.behavior.user.as_deref().is_none_or(|u| u == user);
        let password_ok = self.behavior.password.as_deref().is_none_or(|p| p == password);
        let result = if user_ok && password_ok {
            Ok(())
        } else {
            Err(ClientError::BadCredentials)
        };
        self.lock().login = Login::Pending {
            pumps_left: self.behavior.login_pumps,
            result,
        };
        Ok(())
    }

    fn resolve_track(&self, link: &str) -> Result<Arc<dyn ClientTrack>, ClientError> {
        let mut g = self.lock();
        if !matches!(g.login, Login::LoggedIn) {
            return Err(ClientError::NotLoggedIn);
        }
        let parts: Vec<&str> = link.split(':').collect();
        let [scheme, kind, id] = parts.as_slice() else {
            return Err(ClientError::InvalidLink(link.to_string()));
        };
        if *scheme != "spotify" || kind.is_empty() || id.is_empty() {
            return Err(ClientError::InvalidLink(link.to_string()));
        }
        if *kind != "track" {
            return Err(ClientError::NotATrack(link.to_string()));
        }

        let handle = Arc::new(LoopbackTrackHandle {
            link: link.to_string(),
            entry: self.catalog.get(link).copied(),
            loaded: AtomicBool::new(false),
        });
        if !self.behavior.never_load {
            g.loading.push((handle.clone(), self.behavior.load_pumps));
        }
        Ok(handle)
    }

    fn player_load(&self, track: &Arc<dyn ClientTrack>) -> Result<(), ClientError> {
        if !track.is_loaded() {
            return Err(ClientError::Other(ERROR_IS_LOADING));
        }
        let entry = self
            .catalog
            .get(track.link())
            .copied()
            .ok_or(ClientError::TrackNotPlayable)?;
        let mut g = self.lock();
        g.generation += 1;
        g.player = Some(Player {
            track: entry,
            total_frames: entry.total_frames(self.behavior.format.sample_rate),
            next_frame: 0,
            playing: false,
            seek_marker: false,
            ended: false,
            halted: false,
            accepted_chunks: 0,
        });
        Ok(())
    }

    fn player_play(&self, play: bool) -> Result<(), ClientError> {
        self.require_player(|sim| {
            if let Some(player) = sim.player.as_mut() {
                player.playing = play;
            }
            Ok(())
        })
    }

    fn player_seek(&self, offset: Duration) -> Result<(), ClientError> {
        let rate = self.behavior.format.sample_rate;
        let to_end = self.behavior.end_of_track_on_seek;
        self.require_player(|sim| {
            if self.behavior.fail_seek {
                return Err(ClientError::Network("seek refused".to_string()));
            }
            sim.generation += 1;
            if let Some(player) = sim.player.as_mut() {
                let frame = (offset.as_secs_f64() * rate as f64).round() as u64;
                player.next_frame = if to_end {
                    player.total_frames
                } else {
                    frame.min(player.total_frames)
                };
                player.seek_marker = !to_end;
                player.ended = to_end;
            }
            Ok(())
        })?;
        self.probe
            .0
            .seeks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(offset);
        if to_end {
            self.events.end_of_track();
        }
        Ok(())
    }

    fn player_unload(&self) -> Result<(), ClientError> {
        let mut g = self.lock();
        g.generation += 1;
        g.player = None;
        Ok(())
    }

    fn release(&self) -> Result<(), ClientError> {
        let mut g = self.lock();
        if !g.released {
            g.released = true;
            g.player = None;
            g.loading.clear();
            self.probe.0.sessions_released.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
