//! Seam to the streaming client library.
//!
//! The client is an opaque service: the element creates a session through
//! [`StreamingClient`], issues commands on the returned [`ClientSession`], and receives
//! asynchronous notifications through the [`SessionEvents`] object it registered at
//! creation time. Events are delivered from whichever thread calls
//! [`ClientSession::process_events`] (the session's event thread).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use spotify_src_types::BufferStats;

use crate::format::AudioFormat;

/// Error codes surfaced by the streaming client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("invalid application key")]
    BadApplicationKey,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("user needs a premium account")]
    UserNeedsPremium,
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error("link does not refer to a track: {0}")]
    NotATrack(String),
    #[error("track is not playable")]
    TrackNotPlayable,
    #[error("no track loaded")]
    NoTrackLoaded,
    #[error("network error: {0}")]
    Network(String),
    #[error("session not logged in")]
    NotLoggedIn,
    #[error("client error code {0}")]
    Other(i32),
}

/// Settings handed to the client when creating a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Raw application key blob.
    pub application_key: Vec<u8>,
    /// Directory for the client's cache.
    pub cache_location: PathBuf,
    /// Directory for the client's persisted settings.
    pub settings_location: PathBuf,
    /// User agent reported to the service.
    pub user_agent: String,
    pub compress_playlists: bool,
    pub dont_save_metadata_for_playlists: bool,
}

/// Entry point of the client library.
pub trait StreamingClient: Send + Sync {
    /// Create a session that reports to `events`.
    fn create_session(
        &self,
        config: &SessionConfig,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Arc<dyn ClientSession>, ClientError>;
}

/// A resolved track. Dropping the last reference releases it in the client.
pub trait ClientTrack: Send + Sync {
    /// Link string the track was resolved from.
    fn link(&self) -> &str;
    /// Whether metadata for the track has arrived.
    fn is_loaded(&self) -> bool;
    /// Track length once loaded.
    fn duration(&self) -> Option<Duration>;
}

/// Commands on a live session.
///
/// Implementations may call back into the registered [`SessionEvents`] from inside
/// `process_events` only. Callers serialize calls into a session.
pub trait ClientSession: Send + Sync {
    /// Run pending work and return how long until the client wants to be pumped again.
    fn process_events(&self) -> Result<Duration, ClientError>;
    /// Start an asynchronous login; the outcome arrives via [`SessionEvents::logged_in`].
    fn login(&self, user: &str, password: &str) -> Result<(), ClientError>;
    /// Resolve a link string such as `spotify:track:...` into a track handle.
    fn resolve_track(&self, link: &str) -> Result<Arc<dyn ClientTrack>, ClientError>;
    /// Load `track` into the player.
    fn player_load(&self, track: &Arc<dyn ClientTrack>) -> Result<(), ClientError>;
    /// Start (`true`) or pause (`false`) the player.
    fn player_play(&self, play: bool) -> Result<(), ClientError>;
    /// Seek the loaded track.
    fn player_seek(&self, offset: Duration) -> Result<(), ClientError>;
    /// Unload the current track.
    fn player_unload(&self) -> Result<(), ClientError>;
    /// Release the session. No other call is made afterwards.
    fn release(&self) -> Result<(), ClientError>;
}

/// Callback table the client invokes from its event thread.
///
/// Informational callbacks default to doing nothing.
pub trait SessionEvents: Send + Sync {
    /// Outcome of a login request.
    fn logged_in(&self, result: Result<(), ClientError>);
    /// The session was logged out.
    fn logged_out(&self);
    /// Track or other metadata changed.
    fn metadata_updated(&self) {}
    /// The connection to the service failed.
    fn connection_error(&self, error: ClientError);
    /// Text the service wants shown to the user.
    fn message_to_user(&self, _message: &str) {}
    /// The client wants [`ClientSession::process_events`] to run soon.
    fn notify_main_thread(&self);
    /// Decoded audio is ready. Returns how many of `frames` were consumed; returning
    /// fewer tells the client to deliver the rest again later. Must not block.
    fn music_delivery(&self, format: &AudioFormat, samples: &[i16], frames: usize) -> usize;
    /// Playback was paused because the account started playing elsewhere.
    fn play_token_lost(&self);
    /// Client log line.
    fn log_message(&self, _message: &str) {}
    /// The current track has been fully delivered.
    fn end_of_track(&self);
    /// Streaming of the current track failed.
    fn streaming_error(&self, error: ClientError);
    /// Buffer health used by the client's own rate control.
    fn buffer_stats(&self) -> BufferStats;
    /// User information changed.
    fn userinfo_updated(&self) {}
}
