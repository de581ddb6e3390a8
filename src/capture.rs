//! # Capture Pipeline
//!
//! Two independent periodic producers feeding the session transport while it
//! is open:
//!
//! - **Video sampler**: on a fixed period, asks the camera source for the
//!   current frame (already JPEG-compressed by the host) and sends it as an
//!   outbound video message. Skips silently when the source is not ready.
//! - **Audio forwarder**: receives fixed-size float blocks from the
//!   microphone at the hardware's natural cadence, runs each through the
//!   wire codec and sends it as an outbound audio message. A single reader
//!   on a single channel: a later block is never sent before an earlier one.
//!
//! Both producers check transport readiness on every send; when the socket
//! is not open the sample is dropped, not buffered and not retried. Stale
//! audio or video is worse than missing audio or video in a live session.
//!
//! ## Resource ownership:
//! The pipeline exclusively owns the media device handles (`MediaTracks`)
//! for the session's lifetime. `stop()` aborts both producers and releases
//! every track, and must run on every exit path; an unreleased camera or
//! microphone is a user-visible failure.

use crate::audio::codec;
use crate::transport::{ClientMessage, TransportHandle};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A camera the host has already wired up.
///
/// `capture_jpeg` returns the current frame compressed to a quality-bounded
/// JPEG, or None while the source has not buffered enough data yet (the
/// sampler skips those ticks without error).
pub trait VideoFrameSource: Send {
    fn ready(&self) -> bool;
    fn capture_jpeg(&mut self) -> Option<Vec<u8>>;
}

/// One acquired device handle (a camera stream, a microphone stream).
pub trait MediaTrack: Send {
    /// Release the underlying device. Must be idempotent.
    fn stop(&mut self);
    fn is_live(&self) -> bool;
    fn kind(&self) -> &str;
}

/// Every device handle acquired for one session.
#[derive(Default)]
pub struct MediaTracks {
    tracks: Vec<Box<dyn MediaTrack>>,
}

impl MediaTracks {
    pub fn new(tracks: Vec<Box<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    /// Release every track. Idempotent.
    pub fn stop_all(&mut self) {
        for track in &mut self.tracks {
            if track.is_live() {
                debug!("Stopping {} track", track.kind());
                track.stop();
            }
        }
    }

    /// Number of tracks still holding their device.
    pub fn live_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.is_live()).count()
    }
}

/// Everything the host hands over when a session goes live.
pub struct MediaDevices {
    pub video: Box<dyn VideoFrameSource>,
    /// Fixed-size microphone blocks at the capture rate, in hardware order.
    pub audio_blocks: mpsc::Receiver<Vec<f32>>,
    /// The speaker output for inbound tutor audio, opened per session like
    /// the tracks are.
    pub playback: Box<dyn crate::audio::PlaybackSink>,
    pub tracks: MediaTracks,
}

/// Opens the devices for one session.
///
/// Failure here is a device-access error (permission denied, missing
/// hardware) and blocks the session from going live.
pub trait MediaDeviceFactory: Send {
    fn open(&mut self) -> crate::error::SessionResult<MediaDevices>;
}

/// The running pipeline for one live session.
pub struct CapturePipeline {
    video_task: JoinHandle<()>,
    audio_task: JoinHandle<()>,
    tracks: MediaTracks,
}

impl CapturePipeline {
    /// Start both producers against an open transport.
    ///
    /// ## Parameters:
    /// - **video / audio_blocks / tracks**: the capture half of the opened
    ///   `MediaDevices` (the playback sink goes to the playback driver)
    /// - **transport**: sender handle; producers drop samples when it is
    ///   not open
    /// - **frame_interval**: video sampler period
    pub fn start(
        mut video: Box<dyn VideoFrameSource>,
        mut audio_blocks: mpsc::Receiver<Vec<f32>>,
        tracks: MediaTracks,
        transport: TransportHandle,
        frame_interval: Duration,
    ) -> Self {
        info!(
            "Capture pipeline starting (frame interval {:?})",
            frame_interval
        );

        let video_transport = transport.clone();
        let video_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut sent: u64 = 0;
            loop {
                ticker.tick().await;
                if !video.ready() {
                    trace!("Video source not ready, skipping frame");
                    continue;
                }
                let Some(jpeg) = video.capture_jpeg() else {
                    trace!("Video source produced no frame, skipping");
                    continue;
                };
                let message = ClientMessage::Video {
                    data: BASE64.encode(&jpeg),
                };
                if video_transport.send(message) {
                    sent += 1;
                    trace!("Sent video frame #{} ({} bytes)", sent, jpeg.len());
                } else if !video_transport.is_open() {
                    // Transport gone for good; the session will stop us.
                    debug!("Video sampler idling, transport closed");
                }
            }
        });

        let audio_transport = transport;
        let audio_task = tokio::spawn(async move {
            let mut sent: u64 = 0;
            // One reader, one channel: block order is hardware order.
            while let Some(block) = audio_blocks.recv().await {
                let message = ClientMessage::Audio {
                    data: codec::encode_outbound(&block),
                };
                if audio_transport.send(message) {
                    sent += 1;
                }
            }
            debug!("Audio source channel closed after {} blocks", sent);
        });

        Self {
            video_task,
            audio_task,
            tracks,
        }
    }

    /// Stop both producers and release every device handle.
    ///
    /// Runs on every exit path (clean end, transport error, reset) and is
    /// safe to call more than once through the owning session's teardown.
    pub async fn stop(mut self) {
        self.video_task.abort();
        self.audio_task.abort();
        // The producers hold no device handles, so aborting mid-send leaks
        // nothing; the tracks are released here.
        self.tracks.stop_all();
        if self.tracks.live_count() > 0 {
            warn!(
                "{} media tracks still live after stop",
                self.tracks.live_count()
            );
        }
        info!("Capture pipeline stopped, media tracks released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Test double for a device handle backed by a shared liveness flag.
    struct FlagTrack {
        live: Arc<AtomicBool>,
        name: &'static str,
    }

    impl MediaTrack for FlagTrack {
        fn stop(&mut self) {
            self.live.store(false, Ordering::SeqCst);
        }
        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
        fn kind(&self) -> &str {
            self.name
        }
    }

    struct ScriptedCamera {
        frames: Vec<Vec<u8>>,
    }

    impl VideoFrameSource for ScriptedCamera {
        fn ready(&self) -> bool {
            !self.frames.is_empty()
        }
        fn capture_jpeg(&mut self) -> Option<Vec<u8>> {
            self.frames.pop()
        }
    }

    fn open_handle() -> (TransportHandle, mpsc::UnboundedReceiver<ClientMessage>) {
        crate::transport::TransportHandle::new_for_tests(TransportState::Open)
    }

    #[tokio::test]
    async fn test_audio_blocks_keep_hardware_order() {
        let (handle, mut outbound) = open_handle();
        let (audio_tx, audio_rx) = mpsc::channel(16);

        let pipeline = CapturePipeline::start(
            Box::new(ScriptedCamera { frames: vec![] }),
            audio_rx,
            MediaTracks::default(),
            handle,
            Duration::from_secs(3600),
        );

        // Tagged blocks in hardware order.
        for tag in 1..=4 {
            audio_tx.send(vec![tag as f32 / 10.0; 8]).await.unwrap();
        }
        drop(audio_tx);

        let mut tags = Vec::new();
        while tags.len() < 4 {
            match outbound.recv().await.unwrap() {
                ClientMessage::Audio { data } => {
                    let decoded = codec::decode_inbound(&data).unwrap();
                    tags.push((decoded[0] * 10.0).round() as i32);
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(tags, vec![1, 2, 3, 4]);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_every_track() {
        let camera_live = Arc::new(AtomicBool::new(true));
        let mic_live = Arc::new(AtomicBool::new(true));
        let tracks = MediaTracks::new(vec![
            Box::new(FlagTrack {
                live: camera_live.clone(),
                name: "camera",
            }),
            Box::new(FlagTrack {
                live: mic_live.clone(),
                name: "microphone",
            }),
        ]);

        let (handle, _outbound) = open_handle();
        let (_audio_tx, audio_rx) = mpsc::channel(1);

        let pipeline = CapturePipeline::start(
            Box::new(ScriptedCamera { frames: vec![] }),
            audio_rx,
            tracks,
            handle,
            Duration::from_millis(50),
        );
        pipeline.stop().await;

        assert!(!camera_live.load(Ordering::SeqCst));
        assert!(!mic_live.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_closed_transport_drops_blocks() {
        let (handle, mut outbound) =
            crate::transport::TransportHandle::new_for_tests(TransportState::Closed);
        let (audio_tx, audio_rx) = mpsc::channel(4);
        let pipeline = CapturePipeline::start(
            Box::new(ScriptedCamera { frames: vec![] }),
            audio_rx,
            MediaTracks::default(),
            handle.clone(),
            Duration::from_secs(3600),
        );

        audio_tx.send(vec![0.1; 8]).await.unwrap();
        drop(audio_tx);

        // Give the forwarder a moment, then confirm the block was dropped,
        // not delivered and not buffered.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(outbound.try_recv().is_err());
        assert_eq!(handle.dropped_count(), 1);

        pipeline.stop().await;
    }
}
