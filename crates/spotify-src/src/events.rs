//! Element messages posted to the host.

use std::time::Duration;

use crossbeam_channel::Sender;
use spotify_src_types::SourceState;

/// Notifications an element posts for its host, comparable to bus messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// The lifecycle moved from one state to another.
    StateChanged { from: SourceState, to: SourceState },
    /// The stream duration became known or was reset.
    DurationChanged(Option<Duration>),
    /// The pull loop handed out end of stream.
    EndOfStream,
    /// A non-fatal problem, e.g. a dropped connection the client will retry.
    Warning(String),
    /// A fatal runtime error; pulls fail until the element is stopped.
    Error(String),
}

/// Optional sender for [`SourceEvent`]s. Posting never blocks and never fails; a
/// missing or disconnected receiver just drops the event.
#[derive(Clone, Debug, Default)]
pub struct EventBus {
    tx: Option<Sender<SourceEvent>>,
}

impl EventBus {
    pub fn new(tx: Option<Sender<SourceEvent>>) -> Self {
        Self { tx }
    }

    pub fn post(&self, event: SourceEvent) {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                tracing::trace!("source event dropped");
            }
        }
    }
}
