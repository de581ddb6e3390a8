//! # Audio Pipeline
//!
//! The two halves of the session's audio path:
//!
//! - **codec**: converts between the host's floating-point samples and the
//!   wire format (16-bit little-endian PCM, base64-encoded), both directions.
//! - **playback**: sequences inbound tutor audio for gap-free, strictly
//!   ordered playback.
//!
//! Outbound capture is packed at the fixed capture rate (16 kHz) and inbound
//! decode assumes the fixed playback rate (24 kHz); no resampling happens
//! here; rate agreement is a configuration invariant.

pub mod codec;
pub mod playback;

pub use codec::{decode_inbound, encode_outbound};
pub use playback::{AudioChunk, PlaybackQueue, PlaybackSink};
