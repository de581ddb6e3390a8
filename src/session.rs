//! # Checker Session Controller
//!
//! One stateful object per active session, owning the whole flow: the
//! verification state machine, the face presence gate, the captured face
//! image, the transcript, the playback queue, the capture pipeline and the
//! session transport. One object with an explicit open/close lifecycle instead of
//! connection state scattered across UI surfaces.
//!
//! ## Actor Model:
//! The controller runs as a task driven by a single message channel. User
//! actions, per-frame detector callbacks, transport events and state-pause
//! timers all arrive as messages and are handled one at a time, so the
//! verification state never needs a lock.
//!
//! ## Lifecycle wiring:
//! Entering `InteractiveSession` is the sole trigger for: validating the
//! full identity, acquiring media devices, opening the transport, starting
//! the playback driver and starting the capture pipeline. Leaving it by ANY
//! path (orderly end, transport failure, reset or shutdown) funnels through
//! one teardown routine that stops capture, releases every media track,
//! closes the socket and clears the playback queue. Unreleased camera or
//! microphone access is the failure mode this module exists to prevent.

use crate::api::{HomeworkAnalysis, HomeworkAnalyzer, IdentityVerifier};
use crate::audio::playback::{run_playback_driver, AudioChunk, PlaybackQueue};
use crate::audio::codec;
use crate::capture::{CapturePipeline, MediaDeviceFactory};
use crate::config::CheckerConfig;
use crate::error::SessionError;
use crate::facegate::{CapturedFace, FaceDetection, FacePresenceGate, TargetZone};
use crate::identity::SessionIdentity;
use crate::transcript::Transcript;
use crate::transport::{
    ClientMessage, SessionTransport, TransportEvent, TransportHandle,
};
use crate::verification::{self, VerificationEvent, VerificationState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the session reports outward (to a UI surface or the harness).
#[derive(Debug)]
pub enum SessionEvent {
    /// The verification flow moved to a new state
    StateChanged(VerificationState),
    /// Start was refused because a task identity field is missing
    StartRejected(String),
    /// The recognition service confirmed who is in front of the camera
    StudentRecognized { name: String, roll_number: String },
    /// A new tutor response stream began
    TutorTurnStarted,
    /// A streamed fragment of the current tutor response
    TutorText(String),
    /// The current tutor response stream completed
    TutorTurnEnded,
    /// End-of-session homework scoring (None when analysis was skipped or
    /// the analysis service was unavailable)
    AnalysisReady(Option<HomeworkAnalysis>),
    /// The flow reached Failed; carries the user-facing reason
    SessionFailed(String),
}

/// Everything the session needs injected per deployment.
pub struct SessionDeps {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub analyzer: Option<Arc<dyn HomeworkAnalyzer>>,
    pub media: Box<dyn MediaDeviceFactory>,
}

/// Per-session counters, logged at teardown.
#[derive(Debug, Default, Clone, Copy)]
struct SessionMetrics {
    text_inputs_sent: u64,
    audio_chunks_received: u64,
    text_fragments_received: u64,
    decode_failures: u64,
    outbound_dropped: u64,
}

/// Messages driving the controller task.
enum SessionMsg {
    Start,
    FaceFrame {
        detection: Option<FaceDetection>,
        image: Vec<u8>,
    },
    SendText(String),
    EndSession {
        homework: Option<Vec<u8>>,
    },
    Reset,
    Shutdown,
    Transport(TransportEvent),
    /// A state-pause timer fired; stale generations are ignored
    Timer {
        event: VerificationEvent,
        generation: u64,
    },
}

/// Handle to a running checker session.
///
/// Dropping the handle does not kill the session; call `shutdown()` (or
/// `join()` after it) for an orderly exit.
pub struct CheckerSession {
    messages: mpsc::UnboundedSender<SessionMsg>,
    playback_queue: Arc<PlaybackQueue>,
    task: JoinHandle<()>,
}

impl CheckerSession {
    /// Spawn the controller task for one session.
    ///
    /// ## Parameters:
    /// - **config**: endpoints, media invariants and flow timing
    /// - **identity**: task fields populated; student fields are filled by
    ///   recognition before the transport ever opens
    /// - **deps**: recognition/analysis collaborators and the media factory
    ///
    /// ## Returns:
    /// The command handle and the stream of `SessionEvent`s.
    pub fn spawn(
        config: CheckerConfig,
        identity: SessionIdentity,
        deps: SessionDeps,
    ) -> (Self, UnboundedReceiverStream<SessionEvent>) {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let playback_queue = Arc::new(PlaybackQueue::new());

        let worker = SessionWorker {
            id: Uuid::new_v4(),
            gate: FacePresenceGate::new(
                TargetZone::default(),
                Duration::from_millis(config.timing.face_dwell_ms),
                config.timing.min_detection_confidence,
            ),
            config,
            identity,
            deps,
            state: VerificationState::Idle,
            generation: 0,
            captured_face: None,
            transcript: Transcript::new(),
            playback_queue: playback_queue.clone(),
            live: None,
            metrics: SessionMetrics::default(),
            events: events_tx,
            self_sender: messages_tx.clone(),
        };

        let task = tokio::spawn(worker.run(messages_rx));

        (
            Self {
                messages: messages_tx,
                playback_queue,
                task,
            },
            UnboundedReceiverStream::new(events_rx),
        )
    }

    /// The student pressed start.
    pub fn start(&self) {
        let _ = self.messages.send(SessionMsg::Start);
    }

    /// One frame's face-detection result from the external detector.
    pub fn face_frame(&self, detection: Option<FaceDetection>, image: Vec<u8>) {
        let _ = self.messages.send(SessionMsg::FaceFrame { detection, image });
    }

    /// A typed chat message from the student.
    pub fn send_text(&self, text: String) {
        let _ = self.messages.send(SessionMsg::SendText(text));
    }

    /// End the live session, optionally submitting a homework page image.
    pub fn end_session(&self, homework: Option<Vec<u8>>) {
        let _ = self.messages.send(SessionMsg::EndSession { homework });
    }

    /// Explicit reset back to Idle (the only exit from Failed and Done).
    pub fn reset(&self) {
        let _ = self.messages.send(SessionMsg::Reset);
    }

    /// Tear everything down and stop the controller task.
    pub fn shutdown(&self) {
        let _ = self.messages.send(SessionMsg::Shutdown);
    }

    /// Chunks currently waiting in the playback queue.
    pub fn playback_depth(&self) -> usize {
        self.playback_queue.pending_len()
    }

    /// True when no inbound audio is queued or audible.
    pub fn playback_idle(&self) -> bool {
        self.playback_queue.is_idle()
    }

    /// Wait for the controller task to finish (after `shutdown()`).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Resources that exist only while the session is live.
struct LiveSession {
    transport: SessionTransport,
    handle: TransportHandle,
    capture: CapturePipeline,
    playback_tx: mpsc::UnboundedSender<AudioChunk>,
    playback_driver: JoinHandle<()>,
    /// Forwards transport events into the controller's channel.
    forwarder: JoinHandle<()>,
}

struct SessionWorker {
    id: Uuid,
    config: CheckerConfig,
    identity: SessionIdentity,
    deps: SessionDeps,
    state: VerificationState,
    /// Bumped on every state change; in-flight timers from older states
    /// carry the old value and are discarded on arrival.
    generation: u64,
    gate: FacePresenceGate,
    captured_face: Option<CapturedFace>,
    transcript: Transcript,
    playback_queue: Arc<PlaybackQueue>,
    live: Option<LiveSession>,
    metrics: SessionMetrics,
    events: mpsc::UnboundedSender<SessionEvent>,
    self_sender: mpsc::UnboundedSender<SessionMsg>,
}

impl SessionWorker {
    async fn run(mut self, mut messages: mpsc::UnboundedReceiver<SessionMsg>) {
        info!("Checker session {} ready", self.id);

        while let Some(message) = messages.recv().await {
            match message {
                SessionMsg::Start => self.handle_start(),
                SessionMsg::FaceFrame { detection, image } => {
                    self.handle_face_frame(detection.as_ref(), &image).await;
                }
                SessionMsg::SendText(text) => self.handle_send_text(&text),
                SessionMsg::EndSession { homework } => {
                    self.handle_end_session(homework).await;
                }
                SessionMsg::Reset => self.handle_reset().await,
                SessionMsg::Timer { event, generation } => {
                    self.handle_timer(event, generation).await;
                }
                SessionMsg::Transport(event) => self.handle_transport(event).await,
                SessionMsg::Shutdown => break,
            }
        }

        self.teardown().await;
        info!("Checker session {} finished", self.id);
    }

    fn emit(&self, event: SessionEvent) {
        // A dropped event stream must not kill the session.
        let _ = self.events.send(event);
    }

    /// Run one event through the transition table.
    ///
    /// Off-table events are logged and ignored: stale timers and late
    /// detector callbacks are an expected part of the flow.
    fn transition(&mut self, event: VerificationEvent) -> bool {
        match verification::apply(self.state, event) {
            Ok(next) => {
                debug!(
                    "Session {}: {} -> {} on {:?}",
                    self.id,
                    self.state.as_str(),
                    next.as_str(),
                    event
                );
                self.state = next;
                self.generation += 1;
                self.emit(SessionEvent::StateChanged(next));
                true
            }
            Err(e) => {
                debug!("Session {}: ignoring event: {}", self.id, e);
                false
            }
        }
    }

    /// Arm a one-shot state-pause timer for the current generation.
    fn schedule_pause(&self, event: VerificationEvent, pause: Duration) {
        let sender = self.self_sender.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            let _ = sender.send(SessionMsg::Timer { event, generation });
        });
    }

    fn handle_start(&mut self) {
        if !self.identity.task_fields_present() {
            warn!("Session {}: start refused, task details incomplete", self.id);
            self.emit(SessionEvent::StartRejected(
                "Fill in the grade, subject and chapter before starting".to_string(),
            ));
            return;
        }
        if self.transition(VerificationEvent::StartRequested) {
            self.gate.reset();
        }
    }

    async fn handle_face_frame(&mut self, detection: Option<&FaceDetection>, image: &[u8]) {
        if self.state != VerificationState::FaceScanning {
            return;
        }
        let Some(face) = self.gate.observe(detection, image, Instant::now()) else {
            return;
        };

        // Replace any previously captured face; the old snapshot is released.
        self.captured_face = Some(face);
        if !self.transition(VerificationEvent::FaceCaptured) {
            return;
        }

        let verifier = self.deps.verifier.clone();
        let face = self.captured_face.clone().expect("face just captured");
        match verifier.verify(&face).await {
            Ok(student) => {
                info!(
                    "Session {}: verified as {} ({})",
                    self.id, student.name, student.roll_no
                );
                self.identity = self
                    .identity
                    .clone()
                    .with_student(&student.name, &student.roll_no);
                self.emit(SessionEvent::StudentRecognized {
                    name: student.name,
                    roll_number: student.roll_no,
                });
                if self.transition(VerificationEvent::VerificationPassed) {
                    self.schedule_pause(
                        VerificationEvent::SuccessPauseElapsed,
                        Duration::from_millis(self.config.timing.verified_pause_ms),
                    );
                }
            }
            Err(e) => {
                warn!("Session {}: verification failed: {}", self.id, e);
                self.emit(SessionEvent::SessionFailed(e.to_string()));
                self.transition(VerificationEvent::VerificationRejected);
            }
        }
    }

    async fn handle_timer(&mut self, event: VerificationEvent, generation: u64) {
        if generation != self.generation {
            debug!("Session {}: discarding stale timer {:?}", self.id, event);
            return;
        }
        if !self.transition(event) {
            return;
        }

        match self.state {
            VerificationState::ShowingInstruction => {
                self.schedule_pause(
                    VerificationEvent::InstructionPauseElapsed,
                    Duration::from_millis(self.config.timing.instruction_pause_ms),
                );
            }
            VerificationState::InteractiveSession => {
                if let Err(e) = self.go_live().await {
                    error!("Session {}: failed to go live: {}", self.id, e);
                    self.teardown().await;
                    self.emit(SessionEvent::SessionFailed(e.to_string()));
                    self.transition(VerificationEvent::TransportFailed);
                }
            }
            _ => {}
        }
    }

    /// Open everything the live phase needs. Any error aborts the attempt
    /// and the caller routes the flow to Failed.
    async fn go_live(&mut self) -> Result<(), SessionError> {
        // Refused (not attempted) unless every identity field is populated.
        let target = self.identity.socket_target(&self.config.backend.ws_url)?;

        let devices = self.deps.media.open()?;

        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::connect(&target, transport_tx).await?;
        let handle = transport.handle();

        // Inbound playback path.
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let playback_driver = tokio::spawn(run_playback_driver(
            self.playback_queue.clone(),
            playback_rx,
            devices.playback,
        ));

        // Outbound capture path.
        let capture = CapturePipeline::start(
            devices.video,
            devices.audio_blocks,
            devices.tracks,
            handle.clone(),
            Duration::from_millis(self.config.media.video_frame_interval_ms),
        );

        // Route transport events into the controller channel.
        let forward_to = self.self_sender.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                if forward_to.send(SessionMsg::Transport(event)).is_err() {
                    break;
                }
            }
        });

        self.live = Some(LiveSession {
            transport,
            handle,
            capture,
            playback_tx,
            playback_driver,
            forwarder,
        });
        info!("Session {}: live streaming started", self.id);
        Ok(())
    }

    fn handle_send_text(&mut self, text: &str) {
        let Some(live) = &self.live else {
            warn!("Session {}: dropping text input, no live session", self.id);
            return;
        };
        self.transcript.record_student_input(text);
        if live.handle.send(ClientMessage::TextInput {
            payload: text.to_string(),
        }) {
            self.metrics.text_inputs_sent += 1;
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Inbound(message) => self.dispatch_inbound(message),
            TransportEvent::Closed { reason } => {
                // Only load-bearing closures matter; our own teardown also
                // produces one but the live half is already gone by then.
                if self.live.is_some() {
                    warn!("Session {}: transport lost: {}", self.id, reason);
                    self.teardown().await;
                    self.emit(SessionEvent::SessionFailed(format!(
                        "Connection lost: {}",
                        reason
                    )));
                    self.transition(VerificationEvent::TransportFailed);
                }
            }
        }
    }

    fn dispatch_inbound(&mut self, message: crate::transport::ServerMessage) {
        use crate::transport::ServerMessage as M;
        match message {
            M::StreamStart => {
                self.transcript.begin_tutor_turn();
                self.emit(SessionEvent::TutorTurnStarted);
            }
            M::Text { data } => {
                self.metrics.text_fragments_received += 1;
                self.transcript.append_fragment(&data);
                self.emit(SessionEvent::TutorText(data));
            }
            M::Audio { data } => match codec::decode_inbound(&data) {
                Ok(samples) => {
                    self.metrics.audio_chunks_received += 1;
                    let chunk =
                        AudioChunk::new(samples, self.config.media.playback_sample_rate);
                    if let Some(live) = &self.live {
                        // Ownership moves into the queue via the driver.
                        let _ = live.playback_tx.send(chunk);
                    }
                }
                Err(e) => {
                    // Per-message drop keeps the session alive.
                    self.metrics.decode_failures += 1;
                    warn!("Session {}: dropping inbound audio: {}", self.id, e);
                }
            },
            M::StreamEnd => {
                self.transcript.end_tutor_turn();
                self.emit(SessionEvent::TutorTurnEnded);
            }
        }
    }

    async fn handle_end_session(&mut self, homework: Option<Vec<u8>>) {
        if !self.transition(VerificationEvent::SessionEnded) {
            return;
        }
        self.teardown().await;

        let analysis = match (&self.deps.analyzer, homework) {
            (Some(analyzer), Some(jpeg)) => match analyzer.analyze(&jpeg).await {
                Ok(analysis) => Some(analysis),
                Err(e) => {
                    // Scoring trouble after a finished session is reported,
                    // not fatal.
                    warn!("Session {}: homework analysis failed: {}", self.id, e);
                    None
                }
            },
            _ => {
                debug!("Session {}: no homework submitted or no analyzer", self.id);
                None
            }
        };

        // The report goes out before the terminal state change so consumers
        // see the result by the time they observe Done.
        self.emit(SessionEvent::AnalysisReady(analysis));
        self.transition(VerificationEvent::AnalysisComplete);
    }

    async fn handle_reset(&mut self) {
        self.teardown().await;
        if self.transition(VerificationEvent::Reset) {
            // A fresh scan must re-earn the dwell and re-capture the face.
            self.captured_face = None;
            self.gate.reset();
            self.transcript = Transcript::new();
        }
    }

    /// Release everything the live phase acquired. Safe on every exit path
    /// and safe to call when nothing is live.
    async fn teardown(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };

        self.metrics.outbound_dropped = live.handle.dropped_count();

        // Stop producers and release camera/microphone first, then the
        // socket, then the playback path.
        live.capture.stop().await;
        live.transport.close().await;
        live.forwarder.abort();
        drop(live.playback_tx);
        if let Err(e) = live.playback_driver.await {
            if !e.is_cancelled() {
                warn!("Session {}: playback driver ended abnormally: {}", self.id, e);
            }
        }
        self.playback_queue.reset();

        info!(
            "Session {} torn down: {} text inputs, {} audio chunks in, {} fragments in, {} decode failures, {} outbound drops",
            self.id,
            self.metrics.text_inputs_sent,
            self.metrics.audio_chunks_received,
            self.metrics.text_fragments_received,
            self.metrics.decode_failures,
            self.metrics.outbound_dropped,
        );
    }
}
