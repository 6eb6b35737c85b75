//! Thread-safe bounded queue of decoded audio buffers.
//!
//! [`FrameQueue`] is the hand-off point between the streaming client's event thread
//! (producer, via the delivery bridge) and the host's pull thread (consumer):
//! - delivery callback → [`FrameQueue::try_push_pcm`] (never blocks)
//! - pull thread → [`FrameQueue::dequeue_blocking`] (blocks until data, flush, EOS or error)
//!
//! All state, including the flags and the byte accounting, lives under one mutex and a
//! single [`Condvar`] tied to that mutex is used as a general "state changed" signal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use spotify_src_types::BufferStats;

use crate::format::AudioCaps;

/// Default queue capacity in bytes (roughly 5.7 s of 44.1 kHz stereo S16).
pub const DEFAULT_MAX_BYTES: u64 = 1_000_000;

/// An owned block of interleaved PCM with timing information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Raw S16LE interleaved samples.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: Duration,
    /// Playback duration of `data`.
    pub duration: Duration,
    /// Output caps, stamped by the pull loop.
    pub caps: Option<AudioCaps>,
}

impl FrameBuffer {
    pub fn new(data: Vec<u8>, pts: Duration, duration: Duration) -> Self {
        Self {
            data,
            pts,
            duration,
            caps: None,
        }
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Why a buffer was not admitted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("queue is flushing")]
    Flushing,
    #[error("queue is at end of stream")]
    EndOfStream,
    #[error("queue has failed")]
    Failed,
    #[error("queue full ({queued_bytes} + {incoming} > {max_bytes} bytes)")]
    Full {
        queued_bytes: u64,
        incoming: u64,
        max_bytes: u64,
    },
}

/// Result of a blocking dequeue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    /// Head of the queue.
    Buffer(FrameBuffer),
    /// The queue is flushing; no data will be returned until flushing is cleared.
    Flushing,
    /// End of stream was signalled and everything queued has been consumed.
    EndOfStream,
    /// A fatal error was recorded; carries its description.
    Error(String),
}

struct QueueInner {
    buffers: VecDeque<FrameBuffer>,
    queued_bytes: u64,
    flushing: bool,
    eos: bool,
    /// Bumped by every accepted `set_end_of_stream`.
    eos_epoch: u64,
    /// Bumped by every `flush`.
    flush_epoch: u64,
    started: bool,
    stutter: u64,
    position: Duration,
    error: Option<String>,
}

/// Bounded FIFO of [`FrameBuffer`]s with byte accounting.
///
/// ## Invariants
/// - `queued_bytes` equals the sum of the sizes of the queued buffers.
/// - While `flushing` is set the queue is empty and both enqueue and dequeue fail fast.
/// - Buffers come out in the order they went in.
///
/// Producers never block: a full queue rejects the buffer and the caller reports a
/// partial delivery so the streaming client retries later.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_bytes: AtomicU64,
    low_watermark_at: Mutex<Option<Instant>>,
}

impl FrameQueue {
    /// Create an empty queue holding at most `max_bytes` bytes (`0` = unbounded).
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                buffers: VecDeque::new(),
                queued_bytes: 0,
                flushing: false,
                eos: false,
                eos_epoch: 0,
                flush_epoch: 0,
                started: false,
                stutter: 0,
                position: Duration::ZERO,
                error: None,
            }),
            cv: Condvar::new(),
            max_bytes: AtomicU64::new(max_bytes),
            low_watermark_at: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capacity in bytes (`0` = unbounded).
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes.load(Ordering::Relaxed)
    }

    /// Change the capacity. Already queued buffers are kept.
    pub fn set_max_bytes(&self, max_bytes: u64) {
        self.max_bytes.store(max_bytes, Ordering::Relaxed);
    }

    fn admit(&self, g: &QueueInner, incoming: u64) -> Result<(), Rejected> {
        if g.flushing {
            return Err(Rejected::Flushing);
        }
        if g.error.is_some() {
            return Err(Rejected::Failed);
        }
        if g.eos {
            return Err(Rejected::EndOfStream);
        }
        let max_bytes = self.max_bytes();
        if max_bytes > 0 && g.queued_bytes.saturating_add(incoming) > max_bytes {
            return Err(Rejected::Full {
                queued_bytes: g.queued_bytes,
                incoming,
                max_bytes,
            });
        }
        Ok(())
    }

    /// Append `buffer` unless the queue is flushing, at end of stream, failed, or the
    /// buffer would push `queued_bytes` above capacity.
    ///
    /// The buffer's timestamp is kept as-is and the running position is not touched.
    pub fn try_enqueue(&self, buffer: FrameBuffer) -> Result<(), Rejected> {
        let mut g = self.lock();
        let incoming = buffer.size() as u64;
        self.admit(&g, incoming)?;
        g.buffers.push_back(buffer);
        g.queued_bytes += incoming;
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    /// Append PCM stamped with the running playback position, then advance the position
    /// by `duration`. Returns the timestamp given to the buffer.
    ///
    /// Stamping, admission and the position update happen under the queue lock, so a
    /// concurrent seek either sees the buffer queued (and flushes it) or resets the
    /// position before the buffer is stamped.
    pub fn try_push_pcm(&self, data: Vec<u8>, duration: Duration) -> Result<Duration, Rejected> {
        let mut g = self.lock();
        let incoming = data.len() as u64;
        if let Err(e) = self.admit(&g, incoming) {
            if let Rejected::Full { .. } = e {
                tracing::debug!(
                    queued_bytes = g.queued_bytes,
                    max_bytes = self.max_bytes(),
                    "queue filled"
                );
            }
            return Err(e);
        }
        let pts = g.position;
        g.buffers.push_back(FrameBuffer::new(data, pts, duration));
        g.queued_bytes += incoming;
        g.position += duration;
        tracing::trace!(
            queued_bytes = g.queued_bytes,
            pts_ms = pts.as_millis() as u64,
            "buffer queued"
        );
        drop(g);
        self.cv.notify_all();
        Ok(pts)
    }

    /// Remove and return the head buffer, blocking while the queue is empty and neither
    /// flushing, failed nor at end of stream.
    ///
    /// Every wake re-evaluates all conditions. A [`FrameQueue::flush`] that happens while
    /// the call is waiting makes it return [`Dequeued::Flushing`]. Each wait iteration
    /// increments the stutter counter reported through [`FrameQueue::buffer_stats`].
    pub fn dequeue_blocking(&self) -> Dequeued {
        let mut g = self.lock();
        let flush_epoch = g.flush_epoch;
        loop {
            if g.flushing || g.flush_epoch != flush_epoch {
                return Dequeued::Flushing;
            }
            if let Some(err) = g.error.as_ref() {
                return Dequeued::Error(err.clone());
            }
            if let Some(buffer) = g.buffers.pop_front() {
                g.queued_bytes -= buffer.size() as u64;
                let queued = g.queued_bytes;
                drop(g);
                self.cv.notify_all();
                self.log_low_watermark(queued);
                return Dequeued::Buffer(buffer);
            }
            if g.eos {
                return Dequeued::EndOfStream;
            }
            g.stutter += 1;
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove the head buffer if one is queued, without blocking.
    pub fn try_dequeue(&self) -> Option<FrameBuffer> {
        let mut g = self.lock();
        if g.flushing {
            return None;
        }
        let buffer = g.buffers.pop_front()?;
        g.queued_bytes -= buffer.size() as u64;
        drop(g);
        self.cv.notify_all();
        Some(buffer)
    }

    /// Drop every queued buffer and reset the byte count.
    ///
    /// Consumers blocked in [`FrameQueue::dequeue_blocking`] return
    /// [`Dequeued::Flushing`]. Later calls wait again unless flushing is set.
    pub fn flush(&self) {
        let mut g = self.lock();
        let dropped = g.buffers.len();
        g.buffers.clear();
        g.queued_bytes = 0;
        g.flush_epoch += 1;
        drop(g);
        if dropped > 0 {
            tracing::debug!(dropped, "flushed queued buffers");
        }
        self.cv.notify_all();
    }

    /// Enter or leave flushing. Entering drains the queue; both wake all waiters.
    pub fn set_flushing(&self, flushing: bool) {
        let mut g = self.lock();
        g.flushing = flushing;
        if flushing {
            g.buffers.clear();
            g.queued_bytes = 0;
        }
        drop(g);
        self.cv.notify_all();
    }

    /// Whether the queue is flushing.
    pub fn is_flushing(&self) -> bool {
        self.lock().flushing
    }

    /// Mark the end of stream. Refused (returns `false`) while flushing.
    ///
    /// Already queued buffers are still handed out before the consumer sees EOS.
    pub fn set_end_of_stream(&self) -> bool {
        let mut g = self.lock();
        if g.flushing {
            tracing::debug!("refuse EOS, we are flushing");
            return false;
        }
        g.eos = true;
        g.eos_epoch += 1;
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Counter of accepted end-of-stream signals, for [`FrameQueue::restart_at`].
    pub fn end_of_stream_epoch(&self) -> u64 {
        self.lock().eos_epoch
    }

    /// Clear a previous end-of-stream signal (fresh start or seek).
    pub fn clear_end_of_stream(&self) {
        let mut g = self.lock();
        g.eos = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Whether end of stream has been signalled.
    pub fn is_end_of_stream(&self) -> bool {
        self.lock().eos
    }

    /// Record a fatal error. Queued data is dropped and every pending and future
    /// dequeue returns [`Dequeued::Error`] until [`FrameQueue::reset`].
    pub fn fail(&self, reason: impl Into<String>) {
        let mut g = self.lock();
        g.error = Some(reason.into());
        g.buffers.clear();
        g.queued_bytes = 0;
        drop(g);
        self.cv.notify_all();
    }

    /// The recorded fatal error, if any.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Mark the producer side as started or stopped.
    pub fn set_started(&self, started: bool) {
        self.lock().started = started;
    }

    /// Whether the producer side has been started.
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Reset the running playback position; the next admitted buffer is stamped `pts`.
    pub fn reset_position(&self, pts: Duration) {
        self.lock().position = pts;
    }

    /// Timestamp the next admitted buffer will receive.
    pub fn position(&self) -> Duration {
        self.lock().position
    }

    /// Restart the stream at `pts` after a seek: drop queued data and stamp the next
    /// admitted buffer `pts`, all under one lock.
    ///
    /// End of stream is cleared only if it was signalled at or before `eos_epoch`
    /// (taken with [`FrameQueue::end_of_stream_epoch`] before the seek was issued). An
    /// end of stream signalled since then belongs to the new position and is kept;
    /// returns `true` in that case.
    pub fn restart_at(&self, pts: Duration, eos_epoch: u64) -> bool {
        let mut g = self.lock();
        let dropped = g.buffers.len();
        g.buffers.clear();
        g.queued_bytes = 0;
        let ended = g.eos && g.eos_epoch != eos_epoch;
        g.eos = ended;
        g.position = pts;
        drop(g);
        tracing::debug!(dropped, ended, pts_ms = pts.as_millis() as u64, "restart queue");
        self.cv.notify_all();
        ended
    }

    /// Return the queue to its initial state for a new session: empty, not flushing,
    /// not at end of stream, no error, position and stutter zeroed.
    pub fn reset(&self) {
        let mut g = self.lock();
        g.buffers.clear();
        g.queued_bytes = 0;
        g.flushing = false;
        g.eos = false;
        g.error = None;
        g.stutter = 0;
        g.position = Duration::ZERO;
        drop(g);
        self.cv.notify_all();
    }

    /// Bytes currently queued.
    pub fn queued_bytes(&self) -> u64 {
        self.lock().queued_bytes
    }

    /// Buffers currently queued.
    pub fn len(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffers.is_empty()
    }

    /// Consumer wait iterations that found no data.
    pub fn stutter(&self) -> u64 {
        self.lock().stutter
    }

    /// Buffer health for the streaming client's stats query.
    pub fn buffer_stats(&self) -> BufferStats {
        let g = self.lock();
        BufferStats {
            stutter: g.stutter,
            samples: g.queued_bytes / AudioCaps::output().bytes_per_frame() as u64,
        }
    }

    fn log_low_watermark(&self, queued: u64) {
        let max_bytes = self.max_bytes();
        if max_bytes == 0 {
            return;
        }
        let threshold = max_bytes / 8;
        if queued == 0 || queued >= threshold {
            return;
        }
        let mut last = self
            .low_watermark_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let due = last
            .map(|at| now.duration_since(at) > Duration::from_secs(1))
            .unwrap_or(true);
        if due {
            *last = Some(now);
            tracing::info!(
                queued_bytes = queued,
                threshold_bytes = threshold,
                "frame queue low watermark"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn buf(size: usize, pts_ms: u64) -> FrameBuffer {
        FrameBuffer::new(
            vec![0u8; size],
            Duration::from_millis(pts_ms),
            Duration::from_millis(1),
        )
    }

    fn wait_for_stutter(q: &FrameQueue, at_least: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while q.stutter() < at_least {
            assert!(Instant::now() < deadline, "consumer never started waiting");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn restart_at_drops_data_and_restamps() {
        let q = FrameQueue::new(0);
        q.try_push_pcm(vec![0u8; 16], Duration::from_millis(5)).unwrap();
        assert!(q.set_end_of_stream());
        let epoch = q.end_of_stream_epoch();
        assert!(!q.restart_at(Duration::from_secs(3), epoch));
        assert!(q.is_empty());
        assert_eq!(q.queued_bytes(), 0);
        assert!(!q.is_end_of_stream());
        assert_eq!(
            q.try_push_pcm(vec![0u8; 16], Duration::from_millis(5)),
            Ok(Duration::from_secs(3))
        );
    }

    #[test]
    fn restart_at_keeps_end_of_stream_signalled_after_snapshot() {
        let q = FrameQueue::new(0);
        let epoch = q.end_of_stream_epoch();
        q.try_push_pcm(vec![0u8; 16], Duration::from_millis(5)).unwrap();
        assert!(q.set_end_of_stream());

        assert!(q.restart_at(Duration::from_secs(4), epoch));
        assert!(q.is_end_of_stream());
        assert_eq!(q.queued_bytes(), 0);
        assert_eq!(q.position(), Duration::from_secs(4));
        assert_eq!(q.dequeue_blocking(), Dequeued::EndOfStream);
    }

    #[test]
    fn blocked_dequeue_returns_flushing_after_flush() {
        let q = Arc::new(FrameQueue::new(1_000));
        let q_pop = q.clone();
        let handle = thread::spawn(move || q_pop.dequeue_blocking());

        wait_for_stutter(&q, 1);
        q.flush();
        q.try_enqueue(buf(10, 0)).unwrap();
        assert_eq!(handle.join().unwrap(), Dequeued::Flushing);
        assert!(matches!(q.dequeue_blocking(), Dequeued::Buffer(_)));
    }

    #[test]
    fn capacity_rejects_buffer_that_would_overflow() {
        let q = FrameQueue::new(500);
        assert!(q.try_enqueue(buf(100, 0)).is_ok());
        assert!(q.try_enqueue(buf(200, 1)).is_ok());
        assert_eq!(q.queued_bytes(), 300);

        let err = q.try_enqueue(buf(300, 2)).unwrap_err();
        assert_eq!(
            err,
            Rejected::Full {
                queued_bytes: 300,
                incoming: 300,
                max_bytes: 500
            }
        );
        assert_eq!(q.queued_bytes(), 300);

        match q.dequeue_blocking() {
            Dequeued::Buffer(b) => assert_eq!(b.size(), 100),
            other => panic!("unexpected {other:?}"),
        }
        match q.dequeue_blocking() {
            Dequeued::Buffer(b) => assert_eq!(b.size(), 200),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.queued_bytes(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn exact_fit_is_admitted() {
        let q = FrameQueue::new(300);
        assert!(q.try_enqueue(buf(100, 0)).is_ok());
        assert!(q.try_enqueue(buf(200, 1)).is_ok());
        assert_eq!(q.queued_bytes(), 300);
        assert!(q.try_enqueue(buf(1, 2)).is_err());
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let q = FrameQueue::new(0);
        for i in 0..64 {
            assert!(q.try_enqueue(buf(10_000, i)).is_ok());
        }
        assert_eq!(q.queued_bytes(), 640_000);
    }

    #[test]
    fn queued_bytes_tracks_mixed_operations() {
        let q = FrameQueue::new(10_000);
        let sizes = [7usize, 130, 1, 999, 64, 512, 3];
        let mut expected: VecDeque<usize> = VecDeque::new();
        for (i, size) in sizes.iter().enumerate() {
            q.try_enqueue(buf(*size, i as u64)).unwrap();
            expected.push_back(*size);
            if i % 2 == 1 {
                let Dequeued::Buffer(b) = q.dequeue_blocking() else {
                    panic!("expected buffer");
                };
                assert_eq!(Some(b.size()), expected.pop_front());
            }
            assert_eq!(q.queued_bytes(), expected.iter().sum::<usize>() as u64);
        }
    }

    #[test]
    fn flushing_drains_and_fails_fast() {
        let q = FrameQueue::new(1_000);
        q.try_enqueue(buf(100, 0)).unwrap();
        q.set_flushing(true);

        assert_eq!(q.dequeue_blocking(), Dequeued::Flushing);
        assert!(q.is_empty());
        assert_eq!(q.queued_bytes(), 0);
        assert_eq!(q.try_enqueue(buf(10, 1)), Err(Rejected::Flushing));
        assert!(q.try_dequeue().is_none());

        q.set_flushing(false);
        q.try_enqueue(buf(10, 2)).unwrap();
        assert!(matches!(q.dequeue_blocking(), Dequeued::Buffer(_)));
    }

    #[test]
    fn flush_empties_and_resets_bytes() {
        let q = FrameQueue::new(1_000);
        q.try_enqueue(buf(100, 0)).unwrap();
        q.try_enqueue(buf(250, 1)).unwrap();
        q.flush();
        assert!(q.is_empty());
        assert_eq!(q.queued_bytes(), 0);
    }

    #[test]
    fn end_of_stream_on_empty_queue_returns_immediately() {
        let q = FrameQueue::new(1_000);
        assert!(q.set_end_of_stream());
        assert_eq!(q.dequeue_blocking(), Dequeued::EndOfStream);
        assert_eq!(q.dequeue_blocking(), Dequeued::EndOfStream);
        assert_eq!(q.stutter(), 0);
    }

    #[test]
    fn end_of_stream_serves_queued_data_first() {
        let q = FrameQueue::new(1_000);
        q.try_enqueue(buf(10, 0)).unwrap();
        q.set_end_of_stream();
        assert_eq!(q.try_enqueue(buf(10, 1)), Err(Rejected::EndOfStream));
        assert!(matches!(q.dequeue_blocking(), Dequeued::Buffer(_)));
        assert_eq!(q.dequeue_blocking(), Dequeued::EndOfStream);

        q.clear_end_of_stream();
        q.try_enqueue(buf(10, 2)).unwrap();
        assert!(matches!(q.dequeue_blocking(), Dequeued::Buffer(_)));
    }

    #[test]
    fn end_of_stream_refused_while_flushing() {
        let q = FrameQueue::new(1_000);
        q.set_flushing(true);
        assert!(!q.set_end_of_stream());
        assert!(!q.is_end_of_stream());
    }

    #[test]
    fn blocked_dequeue_wakes_on_flush_start() {
        let q = Arc::new(FrameQueue::new(1_000));
        let q_pop = q.clone();
        let handle = thread::spawn(move || q_pop.dequeue_blocking());

        wait_for_stutter(&q, 1);
        q.set_flushing(true);
        assert_eq!(handle.join().unwrap(), Dequeued::Flushing);
    }

    #[test]
    fn blocked_dequeue_wakes_on_end_of_stream() {
        let q = Arc::new(FrameQueue::new(1_000));
        let q_pop = q.clone();
        let handle = thread::spawn(move || q_pop.dequeue_blocking());

        wait_for_stutter(&q, 1);
        q.set_end_of_stream();
        assert_eq!(handle.join().unwrap(), Dequeued::EndOfStream);
    }

    #[test]
    fn blocked_dequeue_receives_pushed_buffer() {
        let q = Arc::new(FrameQueue::new(1_000));
        let q_pop = q.clone();
        let handle = thread::spawn(move || q_pop.dequeue_blocking());

        wait_for_stutter(&q, 1);
        q.try_push_pcm(vec![1, 2, 3, 4], Duration::from_millis(5))
            .unwrap();
        match handle.join().unwrap() {
            Dequeued::Buffer(b) => assert_eq!(b.data, vec![1, 2, 3, 4]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(q.stutter() >= 1);
    }

    #[test]
    fn fifo_order_across_threads() {
        let q = Arc::new(FrameQueue::new(0));
        let producer_q = q.clone();
        let barrier = Arc::new(Barrier::new(2));
        let start = barrier.clone();

        let producer = thread::spawn(move || {
            start.wait();
            for i in 0..500u16 {
                producer_q
                    .try_push_pcm(i.to_le_bytes().to_vec(), Duration::from_micros(10))
                    .unwrap();
            }
            producer_q.set_end_of_stream();
        });

        barrier.wait();
        let mut seen = Vec::new();
        let mut last_pts = Duration::ZERO;
        loop {
            match q.dequeue_blocking() {
                Dequeued::Buffer(b) => {
                    assert!(b.pts >= last_pts);
                    last_pts = b.pts;
                    seen.push(u16::from_le_bytes([b.data[0], b.data[1]]));
                }
                Dequeued::EndOfStream => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..500u16).collect::<Vec<_>>());
    }

    #[test]
    fn push_pcm_stamps_running_position() {
        let q = FrameQueue::new(1_000);
        let d = Duration::from_millis(20);
        assert_eq!(q.try_push_pcm(vec![0; 8], d), Ok(Duration::ZERO));
        assert_eq!(q.try_push_pcm(vec![0; 8], d), Ok(d));
        assert_eq!(q.position(), d * 2);

        q.flush();
        q.reset_position(Duration::from_secs(30));
        assert_eq!(q.try_push_pcm(vec![0; 8], d), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn rejected_push_does_not_advance_position() {
        let q = FrameQueue::new(8);
        q.try_push_pcm(vec![0; 8], Duration::from_millis(10)).unwrap();
        assert!(q.try_push_pcm(vec![0; 8], Duration::from_millis(10)).is_err());
        assert_eq!(q.position(), Duration::from_millis(10));
    }

    #[test]
    fn fail_wakes_consumer_with_error() {
        let q = Arc::new(FrameQueue::new(1_000));
        q.try_enqueue(buf(10, 0)).unwrap();
        let Dequeued::Buffer(_) = q.dequeue_blocking() else {
            panic!("expected buffer");
        };
        let q_pop = q.clone();
        let handle = thread::spawn(move || q_pop.dequeue_blocking());

        wait_for_stutter(&q, 1);
        q.fail("streaming error");
        assert_eq!(
            handle.join().unwrap(),
            Dequeued::Error("streaming error".to_string())
        );
        assert_eq!(q.try_enqueue(buf(1, 1)), Err(Rejected::Failed));

        q.reset();
        assert!(q.error().is_none());
        assert!(q.try_enqueue(buf(1, 1)).is_ok());
    }

    #[test]
    fn buffer_stats_counts_stereo_frames() {
        let q = FrameQueue::new(0);
        q.try_enqueue(buf(4 * 1024, 0)).unwrap();
        let stats = q.buffer_stats();
        assert_eq!(stats.samples, 1024);
        assert_eq!(stats.stutter, 0);
    }
}
