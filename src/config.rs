//! # Configuration Management
//!
//! Loading and managing engine configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with CHECKER_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (CHECKER_BACKEND__WS_URL, CHECKER_MEDIA__AUDIO_BLOCK_SIZE, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The media rates are configuration *invariants*, not runtime-negotiated:
//! outbound capture is packed at `capture_sample_rate` and inbound playback
//! is decoded at `playback_sample_rate`, so both ends of the wire must agree
//! out of band.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main engine configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (backend, media, timing)
/// keeps the parts that talk to services apart from the parts that shape
/// the local media pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    pub backend: BackendConfig,
    pub media: MediaConfig,
    pub timing: TimingConfig,
}

/// Collaborator service endpoints.
///
/// ## Fields:
/// - `ws_url`: base WebSocket URL of the tutoring backend; the session
///   identity segments are appended to it (percent-encoded)
/// - `recognition_url`: face-recognition endpoint (multipart image upload)
/// - `analysis_url`: homework-analysis endpoint (optional; end-of-session
///   analysis is skipped when unset)
/// - `chat_url`: generic chat-completion endpoint (optional)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub ws_url: String,
    pub recognition_url: String,
    pub analysis_url: Option<String>,
    pub chat_url: Option<String>,
}

/// Media pipeline configuration.
///
/// ## Fields:
/// - `capture_sample_rate`: outbound microphone rate in Hz (16000 on the wire)
/// - `playback_sample_rate`: inbound tutor-audio rate in Hz (24000 on the wire)
/// - `audio_block_size`: samples per outbound audio block (hardware cadence)
/// - `video_frame_interval_ms`: period of the video frame sampler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub audio_block_size: usize,
    pub video_frame_interval_ms: u64,
}

/// Verification flow timing.
///
/// ## Fields:
/// - `face_dwell_ms`: how long both eyes must stay inside the target zone
///   before the face is captured
/// - `min_detection_confidence`: detections below this are treated as
///   no-face frames
/// - `verified_pause_ms`: pause on the success screen before instructions
/// - `instruction_pause_ms`: pause on the instruction screen before the
///   interactive session opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub face_dwell_ms: u64,
    pub min_detection_confidence: f32,
    pub verified_pause_ms: u64,
    pub instruction_pause_ms: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                ws_url: "ws://127.0.0.1:8080/ws/checker".to_string(),
                recognition_url: "http://127.0.0.1:8080/recognize_student/".to_string(),
                analysis_url: None,
                chat_url: None,
            },
            media: MediaConfig {
                capture_sample_rate: 16000,  // what the tutoring backend expects
                playback_sample_rate: 24000, // what the tutoring backend produces
                audio_block_size: 4096,
                video_frame_interval_ms: 1000,
            },
            timing: TimingConfig {
                face_dwell_ms: 2000,
                min_detection_confidence: 0.7,
                verified_pause_ms: 1000,
                instruction_pause_ms: 3000,
            },
        }
    }
}

impl CheckerConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with CHECKER_
    /// 4. Handle the bare WS_URL variable used by deployment environments
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&CheckerConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("CHECKER")
                    .separator("__")
                    .try_parsing(true),
            );

        // Deployment platforms commonly inject the socket target without the
        // prefixed naming convention.
        if let Ok(url) = env::var("WS_URL") {
            settings = settings.set_override("backend.ws_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The media rates and block size are non-zero
    /// - The video sampler period is non-zero
    /// - The detection confidence threshold is a sane probability
    /// - The WebSocket and recognition endpoints are present and well-formed
    pub fn validate(&self) -> Result<()> {
        if self.media.capture_sample_rate == 0 || self.media.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.media.audio_block_size == 0 {
            return Err(anyhow::anyhow!("Audio block size must be greater than 0"));
        }

        if self.media.video_frame_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "Video frame interval must be greater than 0"
            ));
        }

        if !(0.0..=1.0).contains(&self.timing.min_detection_confidence) {
            return Err(anyhow::anyhow!(
                "Detection confidence must be between 0.0 and 1.0"
            ));
        }

        if !self.backend.ws_url.starts_with("ws://") && !self.backend.ws_url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "backend.ws_url must be a ws:// or wss:// URL"
            ));
        }

        if self.backend.recognition_url.is_empty() {
            return Err(anyhow::anyhow!("backend.recognition_url must be set"));
        }

        Ok(())
    }
}
