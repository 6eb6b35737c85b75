//! Element lifecycle state machine.
//!
//! All lifecycle changes go through [`StateMachine::apply`], which validates the
//! transition under one lock. The lock is never held while waiting on the frame queue
//! or on the session.

use std::sync::{Mutex, MutexGuard, PoisonError};

use spotify_src_types::{SourceState, StreamEndReason};

/// Inputs that drive the lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Host asked to start.
    StartRequested,
    /// Session created, logged in and the track is playing.
    Started,
    /// Startup failed or was cancelled.
    StartFailed,
    /// Client reported end of track.
    EndOfTrack,
    /// A seek succeeded; delivery resumes.
    Seeked,
    /// A fatal runtime error was reported.
    Failed,
    /// Host stopped the element.
    Stopped,
}

/// Rejected lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {transition:?} from {from:?}")]
pub struct InvalidTransition {
    pub from: SourceState,
    pub transition: Transition,
}

#[derive(Debug, Default)]
struct Inner {
    state: SourceState,
    end_reason: Option<StreamEndReason>,
    /// End of track reported before `Started`; replayed by the starter.
    pending_end_of_track: bool,
}

/// Lifecycle of one element instance.
#[derive(Debug, Default)]
pub struct StateMachine {
    inner: Mutex<Inner>,
}

/// Compute the next state, or `None` when `transition` is not allowed from `from`.
pub fn next_state(from: SourceState, transition: Transition) -> Option<SourceState> {
    use SourceState as S;
    use Transition as T;
    match (from, transition) {
        (S::Stopped, T::StartRequested) => Some(S::Starting),
        (S::Starting, T::Started) => Some(S::Playing),
        (S::Starting, T::StartFailed) => Some(S::Stopped),
        (S::Starting, T::EndOfTrack) => Some(S::Starting),
        (S::Playing | S::Draining, T::EndOfTrack) => Some(S::Draining),
        (S::Playing | S::Draining, T::Seeked) => Some(S::Playing),
        (S::Starting | S::Playing | S::Draining | S::Error, T::Failed) => Some(S::Error),
        (_, T::Stopped) => Some(S::Stopped),
        _ => None,
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn current(&self) -> SourceState {
        self.lock().state
    }

    /// Reason the last stream ended, if it has.
    pub fn end_reason(&self) -> Option<StreamEndReason> {
        self.lock().end_reason
    }

    /// Apply `transition`, returning `(previous, next)` on success.
    pub fn apply(&self, transition: Transition) -> Result<(SourceState, SourceState), InvalidTransition> {
        let mut g = self.lock();
        let from = g.state;
        let Some(next) = next_state(from, transition) else {
            tracing::debug!(?from, ?transition, "ignored lifecycle transition");
            return Err(InvalidTransition { from, transition });
        };
        g.state = next;
        match transition {
            Transition::StartRequested => {
                g.end_reason = None;
                g.pending_end_of_track = false;
            }
            Transition::EndOfTrack if from == SourceState::Starting => {
                g.pending_end_of_track = true;
            }
            Transition::EndOfTrack => g.end_reason = Some(StreamEndReason::EndOfTrack),
            Transition::Seeked => g.end_reason = None,
            Transition::Failed => g.end_reason = Some(StreamEndReason::Error),
            Transition::Stopped if from.has_session() && g.end_reason.is_none() => {
                g.end_reason = Some(StreamEndReason::Stopped)
            }
            _ => {}
        }
        if matches!(next, SourceState::Stopped | SourceState::Error) {
            g.pending_end_of_track = false;
        }
        if from != next {
            tracing::debug!(?from, ?next, "lifecycle");
        }
        Ok((from, next))
    }

    /// Whether the track ended while starting. Reading clears the flag.
    ///
    /// Only meaningful right after `Started`: the caller applies
    /// [`Transition::EndOfTrack`] to move on to `Draining`.
    pub fn take_pending_end_of_track(&self) -> bool {
        std::mem::take(&mut self.lock().pending_end_of_track)
    }
}
