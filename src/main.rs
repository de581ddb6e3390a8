//! # Checker Session Harness
//!
//! Headless driver for the live-session engine: runs the whole verification
//! and streaming flow against a configured tutoring backend, using a WAV
//! file (or a synthetic tone) as the microphone and a placeholder frame as
//! the camera. Used for protocol soak testing and backend integration
//! checks without a browser in the loop.
//!
//! ## What it does:
//! 1. **Loads configuration** from config.toml and environment variables
//! 2. **Sets up logging** for debugging and monitoring
//! 3. **Spawns one checker session** with real collaborator clients
//! 4. **Scripts the student**: in-zone face detections until verification,
//!    a fixed stretch of live streaming, then an end-of-session submission
//! 5. **Handles shutdown signals** by tearing the session down cleanly
//!
//! ## Environment Variables:
//! - `HARNESS_GRADE` / `HARNESS_SUBJECT` / `HARNESS_CHAPTER`: task identity
//! - `HARNESS_WAV`: path to a 16 kHz mono WAV used as the microphone
//! - `HARNESS_FRAME`: path to a JPEG used as the camera frame
//! - `HARNESS_SECONDS`: how long to keep the live session open (default 10)

use anyhow::{Context, Result};
use checker_session::api::{AnalysisClient, HomeworkAnalyzer, RecognitionClient};
use checker_session::audio::playback::{AudioChunk, PlaybackSink};
use checker_session::capture::{
    MediaDeviceFactory, MediaDevices, MediaTrack, MediaTracks, VideoFrameSource,
};
use checker_session::facegate::{FaceDetection, Point};
use checker_session::{
    CheckerConfig, CheckerSession, SessionDeps, SessionEvent, SessionIdentity, SessionResult,
    VerificationState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by SIGINT/SIGTERM handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// A fallback "frame" when no JPEG is supplied: bare SOI/EOI markers, enough
/// to exercise the wire path (supply HARNESS_FRAME for backend-side decoding).
const PLACEHOLDER_FRAME: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xD9];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = CheckerConfig::load()?;
    config.validate()?;

    info!("Starting checker-session harness v{}", env!("CARGO_PKG_VERSION"));
    info!("Tutoring backend: {}", config.backend.ws_url);

    let identity = SessionIdentity::for_task(
        &std::env::var("HARNESS_GRADE").unwrap_or_else(|_| "5".to_string()),
        &std::env::var("HARNESS_SUBJECT").unwrap_or_else(|_| "Math".to_string()),
        &std::env::var("HARNESS_CHAPTER").unwrap_or_else(|_| "Fractions".to_string()),
    );
    let live_seconds: u64 = std::env::var("HARNESS_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let microphone = load_microphone(&config)?;
    let frame = load_frame()?;

    let analyzer: Option<Arc<dyn HomeworkAnalyzer>> = config
        .backend
        .analysis_url
        .as_deref()
        .map(|url| Arc::new(AnalysisClient::new(url)) as Arc<dyn HomeworkAnalyzer>);

    let deps = SessionDeps {
        verifier: Arc::new(RecognitionClient::new(&config.backend.recognition_url)),
        analyzer,
        media: Box::new(HarnessMediaFactory {
            block_size: config.media.audio_block_size,
            capture_rate: config.media.capture_sample_rate,
            microphone,
            frame: frame.clone(),
        }),
    };

    setup_signal_handlers();

    let (session, mut events) = CheckerSession::spawn(config, identity, deps);
    session.start();

    let run_result = drive(&session, &mut events, frame, live_seconds).await;

    session.shutdown();
    session.join().await;

    match run_result {
        Outcome::Done => {
            info!("Session completed");
            Ok(())
        }
        Outcome::Failed(reason) => anyhow::bail!("session failed: {}", reason),
        Outcome::Interrupted => {
            info!("Interrupted, session torn down");
            Ok(())
        }
    }
}

enum Outcome {
    Done,
    Failed(String),
    Interrupted,
}

/// Script the student through the flow and watch the events.
async fn drive(
    session: &CheckerSession,
    events: &mut tokio_stream::wrappers::UnboundedReceiverStream<SessionEvent>,
    frame: Vec<u8>,
    live_seconds: u64,
) -> Outcome {
    // The scripted face: both eyes centered in the target zone.
    let detection = FaceDetection {
        confidence: 0.95,
        left_eye: Point { x: 0.42, y: 0.38 },
        right_eye: Point { x: 0.58, y: 0.38 },
    };

    let far_future = tokio::time::Instant::now() + Duration::from_secs(86400);
    let mut end_at: Option<tokio::time::Instant> = None;
    let mut state = VerificationState::Idle;
    let mut failure: Option<String> = None;
    let mut detector = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            maybe_event = tokio_stream::StreamExt::next(events) => {
                let Some(event) = maybe_event else {
                    return Outcome::Failed("event stream ended".to_string());
                };
                match event {
                    SessionEvent::StateChanged(next) => {
                        info!("State: {}", next.as_str());
                        state = next;
                        match next {
                            VerificationState::InteractiveSession => {
                                end_at = Some(
                                    tokio::time::Instant::now()
                                        + Duration::from_secs(live_seconds),
                                );
                            }
                            VerificationState::Done => return Outcome::Done,
                            VerificationState::Failed => {
                                return Outcome::Failed(
                                    failure.unwrap_or_else(|| "verification failed".to_string()),
                                );
                            }
                            _ => {}
                        }
                    }
                    SessionEvent::StartRejected(message) => {
                        return Outcome::Failed(message);
                    }
                    SessionEvent::StudentRecognized { name, roll_number } => {
                        info!("Recognized: {} ({})", name, roll_number);
                    }
                    SessionEvent::TutorTurnStarted => info!("Tutor turn started"),
                    SessionEvent::TutorText(fragment) => info!("Tutor: {}", fragment),
                    SessionEvent::TutorTurnEnded => info!("Tutor turn ended"),
                    SessionEvent::AnalysisReady(Some(analysis)) => {
                        info!(
                            "Homework scored {}/{} over {} questions",
                            analysis.total,
                            analysis.max,
                            analysis.questions.len()
                        );
                    }
                    SessionEvent::AnalysisReady(None) => {
                        info!("Session ended without a homework report");
                    }
                    SessionEvent::SessionFailed(reason) => {
                        warn!("Session failure: {}", reason);
                        failure = Some(reason);
                    }
                }
            }
            _ = detector.tick() => {
                // The external face detector's per-frame callback, scripted.
                if state == VerificationState::FaceScanning {
                    session.face_frame(Some(detection), frame.clone());
                }
            }
            _ = tokio::time::sleep_until(end_at.unwrap_or(far_future)), if end_at.is_some() => {
                info!("Live stretch over, ending session");
                session.end_session(Some(frame.clone()));
                end_at = None;
            }
            _ = wait_for_shutdown() => {
                return Outcome::Interrupted;
            }
        }
    }
}

/// Microphone samples for the whole run, at the capture rate.
fn load_microphone(config: &CheckerConfig) -> Result<Arc<Vec<f32>>> {
    if let Ok(path) = std::env::var("HARNESS_WAV") {
        let reader = hound::WavReader::open(&path)
            .with_context(|| format!("opening {}", path))?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.sample_rate != config.media.capture_sample_rate {
            anyhow::bail!(
                "{} must be mono at {} Hz (got {} channel(s) at {} Hz)",
                path,
                config.media.capture_sample_rate,
                spec.channels,
                spec.sample_rate
            );
        }
        let samples: Vec<f32> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<i16>, _>>()
            .context("reading WAV samples")?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect();
        info!(
            "Microphone: {} ({:.1}s of audio)",
            path,
            samples.len() as f64 / config.media.capture_sample_rate as f64
        );
        Ok(Arc::new(samples))
    } else {
        // One second of a 440 Hz tone, looped by the pacing task.
        let rate = config.media.capture_sample_rate;
        let samples: Vec<f32> = (0..rate)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / rate as f32).sin() * 0.3)
            .collect();
        info!("Microphone: synthetic 440 Hz tone");
        Ok(Arc::new(samples))
    }
}

fn load_frame() -> Result<Vec<u8>> {
    if let Ok(path) = std::env::var("HARNESS_FRAME") {
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path))?;
        info!("Camera frame: {} ({} bytes)", path, bytes.len());
        Ok(bytes)
    } else {
        info!("Camera frame: built-in placeholder");
        Ok(PLACEHOLDER_FRAME.to_vec())
    }
}

/// A device handle that only tracks liveness (the harness has no real
/// hardware to release).
struct HarnessTrack {
    live: bool,
    name: &'static str,
}

impl MediaTrack for HarnessTrack {
    fn stop(&mut self) {
        self.live = false;
    }
    fn is_live(&self) -> bool {
        self.live
    }
    fn kind(&self) -> &str {
        self.name
    }
}

/// The scripted camera: always ready, always the same frame.
struct HarnessCamera {
    frame: Vec<u8>,
}

impl VideoFrameSource for HarnessCamera {
    fn ready(&self) -> bool {
        true
    }
    fn capture_jpeg(&mut self) -> Option<Vec<u8>> {
        Some(self.frame.clone())
    }
}

/// Headless playback: log the tutor audio instead of rendering it.
struct LoggingSink;

impl PlaybackSink for LoggingSink {
    fn begin(&mut self, chunk: &AudioChunk) {
        info!(
            "Playing tutor audio: {} samples ({:?})",
            chunk.samples.len(),
            chunk.duration()
        );
    }
}

/// Opens the scripted devices for each live session.
struct HarnessMediaFactory {
    block_size: usize,
    capture_rate: u32,
    microphone: Arc<Vec<f32>>,
    frame: Vec<u8>,
}

impl MediaDeviceFactory for HarnessMediaFactory {
    fn open(&mut self) -> SessionResult<MediaDevices> {
        let (audio_tx, audio_rx) = mpsc::channel(8);

        // Pace the prerecorded samples at the hardware cadence, looping
        // until the capture pipeline hangs up.
        let samples = self.microphone.clone();
        let block_size = self.block_size;
        let block_duration =
            Duration::from_secs_f64(block_size as f64 / self.capture_rate as f64);
        tokio::spawn(async move {
            let mut cursor = 0usize;
            loop {
                let mut block = Vec::with_capacity(block_size);
                while block.len() < block_size {
                    if cursor >= samples.len() {
                        cursor = 0;
                    }
                    block.push(samples[cursor]);
                    cursor += 1;
                }
                if audio_tx.send(block).await.is_err() {
                    break;
                }
                tokio::time::sleep(block_duration).await;
            }
        });

        Ok(MediaDevices {
            video: Box::new(HarnessCamera {
                frame: self.frame.clone(),
            }),
            audio_blocks: audio_rx,
            playback: Box::new(LoggingSink),
            tracks: MediaTracks::new(vec![
                Box::new(HarnessTrack {
                    live: true,
                    name: "camera",
                }),
                Box::new(HarnessTrack {
                    live: true,
                    name: "microphone",
                }),
            ]),
        })
    }
}

/// Initialize the tracing (logging) system for the harness.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checker_session=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set SHUTDOWN_SIGNAL on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
