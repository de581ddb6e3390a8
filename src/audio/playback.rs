//! # Playback Queue
//!
//! An ordered buffer of inbound tutor-audio chunks that guarantees strictly
//! sequential, gap-free playback regardless of arrival timing or chunk size.
//! This is the load-bearing correctness property of the whole inbound audio
//! path: chunks play in exact arrival order, at most one chunk is audible at
//! a time, and a chunk that started playing is never interrupted by a
//! later-arriving one.
//!
//! ## Structure:
//! - **PlaybackQueue**: the passive ordered buffer + "currently playing"
//!   flag. Pure bookkeeping, directly unit-testable.
//! - **run_playback_driver**: the async driver that owns a queue, receives
//!   decoded chunks from the transport dispatcher, hands them to the host's
//!   sink, and chains the next chunk when the current one's audible duration
//!   elapses.
//!
//! ## Ownership:
//! A chunk's ownership transfers into the queue on arrival; the queue alone
//! decides order and release (chunks are dropped once played). Queue depth
//! is unbounded: the sender gets no backpressure signal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One block of decoded tutor audio at the inbound sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Audible duration of this chunk.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }
}

/// The host's speaker. `begin` must start the chunk immediately and return;
/// the driver tracks the chunk's duration itself.
pub trait PlaybackSink: Send {
    fn begin(&mut self, chunk: &AudioChunk);
}

/// Strict-FIFO buffer of pending chunks plus a single "playing" flag.
///
/// ## Thread Safety:
/// Interior `Mutex` so the transport dispatcher (enqueue side) and the
/// playback driver (dequeue side) can share one queue. Single writer,
/// single reader; no other component touches it.
pub struct PlaybackQueue {
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<AudioChunk>,
    playing: bool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState::default()),
        }
    }

    /// Append a chunk to the end of the queue.
    ///
    /// ## Returns:
    /// - **Some(chunk)**: nothing was playing; the caller must start this
    ///   chunk now (it has been marked in-flight)
    /// - **None**: a chunk is already audible; this one waits its turn
    pub fn enqueue(&self, chunk: AudioChunk) -> Option<AudioChunk> {
        let mut state = self.inner.lock().unwrap();
        state.pending.push_back(chunk);
        if state.playing {
            None
        } else {
            state.playing = true;
            state.pending.pop_front()
        }
    }

    /// The current chunk's audible duration has elapsed.
    ///
    /// ## Returns:
    /// - **Some(chunk)**: the next chunk to play, already marked in-flight
    /// - **None**: the queue drained; the playing flag is cleared
    pub fn playback_finished(&self) -> Option<AudioChunk> {
        let mut state = self.inner.lock().unwrap();
        match state.pending.pop_front() {
            Some(next) => Some(next),
            None => {
                state.playing = false;
                None
            }
        }
    }

    /// Clear all pending chunks and the playing flag.
    ///
    /// Used on session teardown; anything unplayed is discarded.
    pub fn reset(&self) {
        let mut state = self.inner.lock().unwrap();
        let dropped = state.pending.len();
        state.pending.clear();
        state.playing = false;
        if dropped > 0 {
            debug!("Playback queue reset, {} pending chunks discarded", dropped);
        }
    }

    /// Number of chunks waiting (not counting the one in flight).
    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().playing
    }

    /// True when nothing is pending and nothing is audible.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock().unwrap();
        state.pending.is_empty() && !state.playing
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a playback sink from a channel of decoded chunks.
///
/// ## Behavior:
/// - A chunk arriving while idle starts immediately.
/// - A chunk arriving mid-playback waits; the in-flight chunk is never
///   interrupted.
/// - When the channel closes (transport teardown), the queue is reset and
///   the driver exits. The chunk currently audible is not cut short by the
///   driver; the host releases its own audio device.
pub async fn run_playback_driver(
    queue: Arc<PlaybackQueue>,
    mut chunks: mpsc::UnboundedReceiver<AudioChunk>,
    mut sink: Box<dyn PlaybackSink>,
) {
    // Far-future deadline while nothing is audible.
    let idle_park = Duration::from_secs(3600);
    let mut deadline = tokio::time::Instant::now() + idle_park;

    loop {
        tokio::select! {
            maybe_chunk = chunks.recv() => {
                match maybe_chunk {
                    Some(chunk) => {
                        trace!("Inbound chunk of {} samples", chunk.samples.len());
                        if let Some(start_now) = queue.enqueue(chunk) {
                            deadline = tokio::time::Instant::now() + start_now.duration();
                            sink.begin(&start_now);
                        }
                    }
                    None => {
                        queue.reset();
                        debug!("Playback channel closed, driver exiting");
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline), if queue.is_playing() => {
                match queue.playback_finished() {
                    Some(next) => {
                        deadline = tokio::time::Instant::now() + next.duration();
                        sink.begin(&next);
                    }
                    None => {
                        deadline = tokio::time::Instant::now() + idle_park;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn chunk(tag: f32, samples: usize) -> AudioChunk {
        AudioChunk::new(vec![tag; samples], 24000)
    }

    /// A sink that records the identifying first sample of every chunk it
    /// is asked to start.
    struct RecordingSink {
        started: Arc<StdMutex<Vec<f32>>>,
    }

    impl PlaybackSink for RecordingSink {
        fn begin(&mut self, chunk: &AudioChunk) {
            self.started.lock().unwrap().push(chunk.samples[0]);
        }
    }

    #[test]
    fn test_enqueue_starts_only_when_idle() {
        let queue = PlaybackQueue::new();

        let first = queue.enqueue(chunk(1.0, 10));
        assert_eq!(first.unwrap().samples[0], 1.0);
        assert!(queue.is_playing());

        // Second chunk arrives while the first is audible: it must wait.
        assert!(queue.enqueue(chunk(2.0, 10)).is_none());
        assert_eq!(queue.pending_len(), 1);
    }

    /// FIFO order for any interleaving of enqueues and completions.
    #[test]
    fn test_fifo_order_under_interleaving() {
        let queue = PlaybackQueue::new();
        let mut played = Vec::new();

        // Burst of three, then completions interleaved with late arrivals.
        if let Some(c) = queue.enqueue(chunk(1.0, 10)) {
            played.push(c.samples[0]);
        }
        queue.enqueue(chunk(2.0, 10));
        queue.enqueue(chunk(3.0, 10));

        if let Some(c) = queue.playback_finished() {
            played.push(c.samples[0]);
        }
        queue.enqueue(chunk(4.0, 10));
        if let Some(c) = queue.playback_finished() {
            played.push(c.samples[0]);
        }
        if let Some(c) = queue.playback_finished() {
            played.push(c.samples[0]);
        }
        assert!(queue.playback_finished().is_none());
        assert!(!queue.is_playing());

        assert_eq!(played, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_reset_discards_pending_and_flag() {
        let queue = PlaybackQueue::new();
        queue.enqueue(chunk(1.0, 10));
        queue.enqueue(chunk(2.0, 10));
        queue.reset();
        assert!(queue.is_idle());
        assert_eq!(queue.pending_len(), 0);

        // Restarting after a reset behaves like a fresh queue.
        assert!(queue.enqueue(chunk(3.0, 10)).is_some());
    }

    #[tokio::test]
    async fn test_driver_plays_in_arrival_order() {
        let queue = Arc::new(PlaybackQueue::new());
        let started = Arc::new(StdMutex::new(Vec::new()));
        let sink = Box::new(RecordingSink {
            started: started.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run_playback_driver(queue.clone(), rx, sink));

        // 240 samples at 24 kHz = 10 ms per chunk. Stagger arrivals so some
        // land mid-playback and some while idle.
        for (tag, gap_ms) in [(1.0, 0), (2.0, 3), (3.0, 25), (4.0, 1)] {
            tokio::time::sleep(Duration::from_millis(gap_ms)).await;
            tx.send(chunk(tag, 240)).unwrap();
        }

        // Let everything drain, then tear down.
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        driver.await.unwrap();

        assert_eq!(*started.lock().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(queue.is_idle());
    }
}
