//! Callback bridge between the streaming client and the element.
//!
//! [`DeliveryBridge`] is the [`SessionEvents`] object registered with the client. It runs
//! on the client's event thread and must never block: audio goes into the
//! [`FrameQueue`] with fail-fast admission, and a refused block is reported back as
//! "0 frames consumed" so the client redelivers it later.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use spotify_src_types::BufferStats;

use crate::client::{ClientError, SessionEvents};
use crate::events::{EventBus, SourceEvent};
use crate::format::{AudioFormat, frames_to_duration, samples_to_le_bytes};
use crate::queue::FrameQueue;
use crate::session::SessionState;
use crate::state::{StateMachine, Transition};

/// Per-element callback context handed to the client at session creation.
pub struct DeliveryBridge {
    queue: Arc<FrameQueue>,
    session: Arc<SessionState>,
    lifecycle: Arc<StateMachine>,
    bus: EventBus,
    format_warned: AtomicBool,
}

impl DeliveryBridge {
    pub fn new(
        queue: Arc<FrameQueue>,
        session: Arc<SessionState>,
        lifecycle: Arc<StateMachine>,
        bus: EventBus,
    ) -> Self {
        Self {
            queue,
            session,
            lifecycle,
            bus,
            format_warned: AtomicBool::new(false),
        }
    }

    fn transition(&self, transition: Transition) {
        if let Ok((from, to)) = self.lifecycle.apply(transition) {
            if from != to {
                self.bus.post(SourceEvent::StateChanged { from, to });
            }
        }
    }

    /// Treat a runtime error as fatal: move the lifecycle to `Error`, tell the host,
    /// then fail the queue so pulls stop. A puller woken by the failure already sees
    /// `Error`.
    fn fail(&self, reason: String) {
        tracing::warn!(reason = %reason, "fatal streaming failure");
        self.transition(Transition::Failed);
        self.bus.post(SourceEvent::Error(reason.clone()));
        self.queue.fail(reason);
    }
}

impl SessionEvents for DeliveryBridge {
    fn logged_in(&self, result: Result<(), ClientError>) {
        match &result {
            Ok(()) => tracing::debug!("logged in"),
            Err(e) => tracing::debug!(error = %e, "login failed"),
        }
        self.session.on_logged_in(result);
    }

    fn logged_out(&self) {
        tracing::debug!("logged out");
        self.session.on_logged_out();
    }

    fn metadata_updated(&self) {
        tracing::debug!("metadata updated");
        self.session.on_metadata_updated();
    }

    fn connection_error(&self, error: ClientError) {
        tracing::warn!(error = %error, "connection error");
        self.bus.post(SourceEvent::Warning(format!("connection error: {error}")));
        self.session.on_connection_error(error);
    }

    fn message_to_user(&self, message: &str) {
        tracing::info!(message, "message to user");
    }

    fn notify_main_thread(&self) {
        tracing::trace!("notify main thread");
        self.session.notify();
    }

    fn music_delivery(&self, format: &AudioFormat, samples: &[i16], frames: usize) -> usize {
        let bufsize = format.bytes_for_frames(frames);
        tracing::trace!(
            bufsize,
            rate = format.sample_rate,
            channels = format.channels,
            frames,
            "music delivery"
        );
        if frames == 0 {
            // Seek in progress.
            return 0;
        }

        if !format.matches_output() && !self.format_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                rate = format.sample_rate,
                channels = format.channels,
                "client delivered audio in an unexpected format"
            );
        }

        let wanted = frames.saturating_mul(format.channels as usize);
        let Some(block) = samples.get(..wanted) else {
            tracing::warn!(frames, samples = samples.len(), "short music delivery refused");
            return 0;
        };

        let duration = frames_to_duration(frames as u64, format.sample_rate);
        match self.queue.try_push_pcm(samples_to_le_bytes(block), duration) {
            Ok(_pts) => frames,
            Err(reason) => {
                tracing::trace!(%reason, "refuse music data");
                0
            }
        }
    }

    fn play_token_lost(&self) {
        self.session.on_play_token_lost();
        self.fail("play token lost".to_string());
    }

    fn log_message(&self, message: &str) {
        tracing::debug!(message = message.trim_end(), "client log");
    }

    fn end_of_track(&self) {
        tracing::debug!("end of track");
        self.session.on_end_of_track();
        if self.queue.is_flushing() {
            tracing::debug!("refuse EOS, we are flushing");
            return;
        }
        // Lifecycle first, so a consumer woken by EOS already sees `Draining`. While
        // still starting this is only remembered; `start` finishes the transition.
        self.transition(Transition::EndOfTrack);
        self.queue.set_end_of_stream();
    }

    fn streaming_error(&self, error: ClientError) {
        self.session.on_streaming_error(error.clone());
        self.fail(format!("streaming error: {error}"));
    }

    fn buffer_stats(&self) -> BufferStats {
        let stats = self.queue.buffer_stats();
        tracing::trace!(stutter = stats.stutter, samples = stats.samples, "audio buffer stats");
        stats
    }

    fn userinfo_updated(&self) {
        tracing::debug!("userinfo updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Dequeued;
    use spotify_src_types::SourceState;
    use std::time::Duration;

    const STEREO: AudioFormat = AudioFormat {
        sample_rate: 44_100,
        channels: 2,
    };

    fn bridge(max_bytes: u64) -> (DeliveryBridge, Arc<FrameQueue>, Arc<StateMachine>) {
        let queue = Arc::new(FrameQueue::new(max_bytes));
        let lifecycle = Arc::new(StateMachine::new());
        let bridge = DeliveryBridge::new(
            queue.clone(),
            SessionState::shared(),
            lifecycle.clone(),
            EventBus::default(),
        );
        (bridge, queue, lifecycle)
    }

    fn playing(lifecycle: &StateMachine) {
        lifecycle.apply(Transition::StartRequested).unwrap();
        lifecycle.apply(Transition::Started).unwrap();
    }

    #[test]
    fn zero_frames_is_a_seek_marker() {
        let (bridge, queue, _) = bridge(0);
        assert_eq!(bridge.music_delivery(&STEREO, &[], 0), 0);
        assert_eq!(queue.queued_bytes(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn delivery_copies_and_stamps() {
        let (bridge, queue, _) = bridge(0);
        let samples = vec![1i16; 441 * 2];
        assert_eq!(bridge.music_delivery(&STEREO, &samples, 441), 441);
        assert_eq!(bridge.music_delivery(&STEREO, &samples, 441), 441);
        assert_eq!(queue.queued_bytes(), 2 * 441 * 4);

        let Dequeued::Buffer(first) = queue.dequeue_blocking() else {
            panic!("expected buffer");
        };
        assert_eq!(first.pts, Duration::ZERO);
        assert_eq!(first.duration, Duration::from_millis(10));
        assert_eq!(first.size(), 441 * 4);
        assert_eq!(&first.data[..2], &1i16.to_le_bytes());

        let Dequeued::Buffer(second) = queue.dequeue_blocking() else {
            panic!("expected buffer");
        };
        assert_eq!(second.pts, Duration::from_millis(10));
    }

    #[test]
    fn full_queue_reports_nothing_consumed() {
        let (bridge, queue, _) = bridge(4 * 100);
        let samples = vec![0i16; 100 * 2];
        assert_eq!(bridge.music_delivery(&STEREO, &samples, 100), 100);
        assert_eq!(bridge.music_delivery(&STEREO, &samples, 100), 0);
        assert_eq!(queue.queued_bytes(), 400);
        assert_eq!(queue.position(), frames_to_duration(100, 44_100));
    }

    #[test]
    fn flushing_queue_refuses_delivery() {
        let (bridge, queue, _) = bridge(0);
        queue.set_flushing(true);
        assert_eq!(bridge.music_delivery(&STEREO, &[0i16; 4], 2), 0);
    }

    #[test]
    fn short_sample_slice_is_refused() {
        let (bridge, queue, _) = bridge(0);
        assert_eq!(bridge.music_delivery(&STEREO, &[0i16; 3], 2), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn end_of_track_moves_to_draining() {
        let (bridge, queue, lifecycle) = bridge(0);
        playing(&lifecycle);
        bridge.music_delivery(&STEREO, &[0i16; 4], 2);
        bridge.end_of_track();

        assert_eq!(lifecycle.current(), SourceState::Draining);
        assert!(matches!(queue.dequeue_blocking(), Dequeued::Buffer(_)));
        assert_eq!(queue.dequeue_blocking(), Dequeued::EndOfStream);
    }

    #[test]
    fn end_of_track_while_flushing_is_refused() {
        let (bridge, queue, lifecycle) = bridge(0);
        playing(&lifecycle);
        queue.set_flushing(true);
        bridge.end_of_track();
        assert_eq!(lifecycle.current(), SourceState::Playing);
        assert!(!queue.is_end_of_stream());
    }

    #[test]
    fn streaming_error_fails_queue_and_lifecycle() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let queue = Arc::new(FrameQueue::new(0));
        let lifecycle = Arc::new(StateMachine::new());
        let session = SessionState::shared();
        let bridge = DeliveryBridge::new(
            queue.clone(),
            session.clone(),
            lifecycle.clone(),
            EventBus::new(Some(tx)),
        );
        playing(&lifecycle);

        bridge.streaming_error(ClientError::Network("reset".to_string()));

        assert_eq!(lifecycle.current(), SourceState::Error);
        assert!(matches!(queue.dequeue_blocking(), Dequeued::Error(_)));
        assert!(session.snapshot().streaming_error.is_some());
        let events: Vec<SourceEvent> = rx.try_iter().collect();
        assert!(events.contains(&SourceEvent::StateChanged {
            from: SourceState::Playing,
            to: SourceState::Error
        }));
        assert!(events.iter().any(|e| matches!(e, SourceEvent::Error(_))));
    }

    #[test]
    fn end_of_track_while_starting_is_deferred() {
        let (bridge, queue, lifecycle) = bridge(0);
        lifecycle.apply(Transition::StartRequested).unwrap();
        bridge.end_of_track();
        assert_eq!(lifecycle.current(), SourceState::Starting);
        assert!(queue.is_end_of_stream());
        lifecycle.apply(Transition::Started).unwrap();
        assert!(lifecycle.take_pending_end_of_track());
    }

    #[test]
    fn woken_puller_sees_error_state() {
        let (bridge, queue, lifecycle) = bridge(0);
        playing(&lifecycle);
        let puller = {
            let queue = queue.clone();
            let lifecycle = lifecycle.clone();
            std::thread::spawn(move || {
                let result = queue.dequeue_blocking();
                (result, lifecycle.current())
            })
        };
        while queue.stutter() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        bridge.play_token_lost();
        let (result, state) = puller.join().unwrap();
        assert_eq!(result, Dequeued::Error("play token lost".to_string()));
        assert_eq!(state, SourceState::Error);
    }

    #[test]
    fn connection_error_is_recorded_but_not_fatal() {
        let (bridge, queue, lifecycle) = bridge(0);
        playing(&lifecycle);
        bridge.connection_error(ClientError::Network("timeout".to_string()));
        assert_eq!(lifecycle.current(), SourceState::Playing);
        assert!(queue.error().is_none());
        assert_eq!(bridge.music_delivery(&STEREO, &[0i16; 4], 2), 2);
    }

    #[test]
    fn buffer_stats_reflect_queue() {
        let (bridge, _queue, _) = bridge(0);
        bridge.music_delivery(&STEREO, &[0i16; 200], 100);
        assert_eq!(bridge.buffer_stats().samples, 100);
    }
}
