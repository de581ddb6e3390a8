//! # Wire Audio Codec
//!
//! Converts between the host's native floating-point audio samples and the
//! wire format: 16-bit little-endian PCM, base64-encoded into a JSON string
//! field.
//!
//! ## Key Functions:
//! - **encode_outbound**: float32 [-1, 1] → clamp → i16 LE → base64
//! - **decode_inbound**: base64 → i16 LE → float32 [-1, 1]
//!
//! ## Failure policy:
//! Malformed base64 or a byte length that is not a multiple of two is an
//! input contract violation and fails loudly. Silently truncating a torn
//! sample would desynchronize everything played after it.

use crate::error::{SessionError, SessionResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Convert float samples to 16-bit PCM, clamping to [-1, 1].
///
/// ## Conversion:
/// Scales from float range [-1.0, 1.0] to the 16-bit integer range. Values
/// outside [-1, 1] (hosts occasionally deliver slight overshoot) clamp
/// rather than wrap.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample.clamp(-1.0, 1.0) * 32767.0;
            scaled as i16
        })
        .collect()
}

/// Convert 16-bit PCM samples to float format.
///
/// Scales from [-32768, 32767] to [-1.0, 1.0] by dividing by 32768.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Encode one block of captured samples into the wire representation.
///
/// ## Parameters:
/// - **samples**: one fixed-size capture block, already at the outbound rate
///
/// ## Returns:
/// A base64 string of the little-endian packed 16-bit samples, ready to be
/// placed in an outbound `audio` message. Deterministic, lossless given the
/// clamp.
pub fn encode_outbound(samples: &[f32]) -> String {
    let pcm = float_to_pcm(samples);
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm {
        // Writing into a Vec cannot fail.
        bytes.write_i16::<LittleEndian>(sample).expect("vec write");
    }
    BASE64.encode(&bytes)
}

/// Decode one inbound wire payload into float samples.
///
/// ## Returns:
/// - **Ok(samples)**: normalized float samples at the inbound rate
/// - **Err(Codec)**: malformed base64, or a byte count that tears a sample
pub fn decode_inbound(payload: &str) -> SessionResult<Vec<f32>> {
    let bytes = BASE64.decode(payload)?;

    if bytes.is_empty() {
        return Err(SessionError::Codec("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Codec(format!(
            "audio payload length {} is not a multiple of 2",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode-then-decode must reconstruct within the quantization bound.
    #[test]
    fn test_round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9)
            .collect();

        let decoded = decode_inbound(&encode_outbound(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        // One count of integer quantization plus the 32767/32768 scale
        // asymmetry between the encode and decode directions.
        for (original, restored) in samples.iter().zip(decoded.iter()) {
            assert!(
                (original - restored).abs() <= 2.0 / 32768.0,
                "quantization error too large: {} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_out_of_range_samples_clamp() {
        let pcm = float_to_pcm(&[1.5, -2.0, 0.0]);
        assert_eq!(pcm[0], 32767);
        assert_eq!(pcm[1], -32767);
        assert_eq!(pcm[2], 0);
    }

    #[test]
    fn test_little_endian_packing() {
        // Full-scale positive is exactly 0x7FFF and must serialize low byte first.
        let encoded = encode_outbound(&[1.0]);
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(bytes, vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_malformed_base64_is_loud() {
        assert!(matches!(
            decode_inbound("not!!valid@@base64"),
            Err(SessionError::Codec(_))
        ));
    }

    #[test]
    fn test_torn_sample_is_loud() {
        // Three bytes: one full sample plus a torn one.
        let payload = BASE64.encode([0x01u8, 0x02, 0x03]);
        assert!(matches!(
            decode_inbound(&payload),
            Err(SessionError::Codec(_))
        ));
    }

    #[test]
    fn test_empty_payload_is_loud() {
        assert!(decode_inbound("").is_err());
    }
}
