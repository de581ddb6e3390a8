//! # checker-session
//!
//! Real-time proctored tutoring-session engine for the homework checker:
//! a face-verification flow gating a live bidirectional media session that
//! streams webcam frames and microphone audio to a tutoring backend over
//! WebSocket and plays the streamed tutor audio back in strict order.
//!
//! ## Architecture:
//! - **config**: layered configuration (TOML + environment + defaults)
//! - **error**: engine error types
//! - **identity**: session identity and connection-target building
//! - **audio**: wire codec and the strict-FIFO playback queue
//! - **capture**: camera/microphone producers and device-handle release
//! - **transport**: the WebSocket connection and its typed messages
//! - **verification**: the step-by-step verification state machine
//! - **facegate**: dwell-gated face capture over external detections
//! - **transcript**: the running tutor/student turn log
//! - **session**: the per-session controller wiring all of the above
//! - **api**: collaborator REST clients (recognition, analysis, chat)

pub mod api;
pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod facegate;
pub mod identity;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod verification;

pub use config::CheckerConfig;
pub use error::{SessionError, SessionResult};
pub use identity::SessionIdentity;
pub use session::{CheckerSession, SessionDeps, SessionEvent};
pub use verification::VerificationState;
