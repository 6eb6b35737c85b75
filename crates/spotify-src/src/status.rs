use std::time::Duration;

use spotify_src_types::SourceStatus;

use crate::queue::FrameQueue;
use crate::session::SessionFlags;
use crate::state::StateMachine;
use crate::uri::SpotifyUri;

/// Inputs gathered from a running element for a status snapshot.
pub struct StatusSources<'a> {
    pub uri: &'a SpotifyUri,
    pub duration: Option<Duration>,
    pub queue: &'a FrameQueue,
    pub lifecycle: &'a StateMachine,
    /// Flags of the live session, when one exists.
    pub session: Option<SessionFlags>,
}

impl StatusSources<'_> {
    /// Return a snapshot suitable for hosts and the CLI's JSON report.
    pub fn snapshot(&self) -> SourceStatus {
        let session = self.session.clone().unwrap_or_default();
        SourceStatus {
            state: self.lifecycle.current(),
            uri: self.uri.to_string(),
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
            position_ms: self.queue.position().as_millis() as u64,
            queued_bytes: self.queue.queued_bytes(),
            max_bytes: self.queue.max_bytes(),
            queued_buffers: self.queue.len(),
            stutter: self.queue.stutter(),
            flushing: self.queue.is_flushing(),
            end_of_stream: self.queue.is_end_of_stream(),
            connection_error: session.connection_error.map(|e| e.to_string()),
            streaming_error: session.streaming_error.map(|e| e.to_string()),
            play_token_lost: session.play_token_lost,
            end_reason: self.lifecycle.end_reason(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::state::Transition;
    use crate::uri::DEFAULT_URI;
    use spotify_src_types::{SourceState, StreamEndReason};

    #[test]
    fn snapshot_of_idle_element() {
        let uri = SpotifyUri::parse(DEFAULT_URI).unwrap();
        let queue = FrameQueue::new(1000);
        let lifecycle = StateMachine::new();
        let status = StatusSources {
            uri: &uri,
            duration: None,
            queue: &queue,
            lifecycle: &lifecycle,
            session: None,
        }
        .snapshot();
        assert_eq!(status.state, SourceState::Stopped);
        assert_eq!(status.uri, DEFAULT_URI);
        assert_eq!(status.max_bytes, 1000);
        assert_eq!(status.queued_buffers, 0);
        assert!(status.connection_error.is_none());
    }

    #[test]
    fn snapshot_reflects_queue_and_session() {
        let uri = SpotifyUri::parse(DEFAULT_URI).unwrap();
        let queue = FrameQueue::new(0);
        queue
            .try_push_pcm(vec![0u8; 400], Duration::from_millis(250))
            .unwrap();
        let lifecycle = StateMachine::new();
        lifecycle.apply(Transition::StartRequested).unwrap();
        lifecycle.apply(Transition::Started).unwrap();
        lifecycle.apply(Transition::Failed).unwrap();
        let flags = SessionFlags {
            connection_error: Some(ClientError::Network("reset".to_string())),
            play_token_lost: true,
            ..SessionFlags::default()
        };

        let status = StatusSources {
            uri: &uri,
            duration: Some(Duration::from_secs(3)),
            queue: &queue,
            lifecycle: &lifecycle,
            session: Some(flags),
        }
        .snapshot();
        assert_eq!(status.state, SourceState::Error);
        assert_eq!(status.duration_ms, Some(3000));
        assert_eq!(status.position_ms, 250);
        assert_eq!(status.queued_bytes, 400);
        assert_eq!(status.queued_buffers, 1);
        assert!(status.play_token_lost);
        assert_eq!(status.connection_error.as_deref(), Some("network error: reset"));
        assert_eq!(status.end_reason, Some(StreamEndReason::Error));
    }
}
