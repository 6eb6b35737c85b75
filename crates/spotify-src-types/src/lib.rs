use serde::{Deserialize, Serialize};

/// Lifecycle state of a source element.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// No session exists; settings may be changed.
    #[default]
    Stopped,
    /// Session is being created, logged in and the track loaded.
    Starting,
    /// Track is playing and audio is being delivered.
    Playing,
    /// The client reported end of track; queued audio is still being served.
    Draining,
    /// A fatal runtime error was reported by the streaming client.
    Error,
}

impl SourceState {
    /// `true` when a session is alive (anything but `Stopped`).
    pub fn has_session(self) -> bool {
        !matches!(self, SourceState::Stopped)
    }
}

/// Reason why a stream ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEndReason {
    /// The client signalled end of track and the queue drained.
    EndOfTrack,
    /// The element was stopped by the host.
    Stopped,
    /// A fatal streaming error ended playback.
    Error,
}

/// Buffer health reported back to the streaming client.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferStats {
    /// Number of consumer wait iterations that found no data.
    pub stutter: u64,
    /// Queued stereo frames.
    pub samples: u64,
}

/// Point-in-time status of a source element.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceStatus {
    /// Current lifecycle state.
    pub state: SourceState,
    /// Configured `spotify://` URI.
    pub uri: String,
    /// Track duration in milliseconds once a track is loaded.
    pub duration_ms: Option<u64>,
    /// Timestamp of the next buffer to be produced, in milliseconds.
    pub position_ms: u64,
    /// Bytes currently queued.
    pub queued_bytes: u64,
    /// Queue capacity in bytes (`0` = unbounded).
    pub max_bytes: u64,
    /// Buffers currently queued.
    pub queued_buffers: usize,
    /// Consumer wait iterations without data.
    pub stutter: u64,
    /// Whether the queue is flushing.
    pub flushing: bool,
    /// Whether end of stream has been signalled.
    pub end_of_stream: bool,
    /// Last connection error reported by the client, if any.
    pub connection_error: Option<String>,
    /// Last streaming error reported by the client, if any.
    pub streaming_error: Option<String>,
    /// Whether the play token was lost to another client.
    pub play_token_lost: bool,
    /// Terminal reason of the last stream.
    pub end_reason: Option<StreamEndReason>,
}
