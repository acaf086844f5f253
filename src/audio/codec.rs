//! # PCM Wire Codec
//!
//! Pure conversion functions between normalized float samples and the wire
//! formats the voice platform speaks:
//!
//! - **Outbound**: f32 samples in [-1.0, 1.0] → signed 16-bit little-endian
//!   PCM bytes (one binary WebSocket frame per capture buffer)
//! - **Inbound**: base64 text (carried inside playAudio control messages) →
//!   PCM16 LE bytes → normalized f32 samples
//!
//! No state, no I/O. Everything here is deterministic and covered by tests.

use crate::error::RelayResult;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Sample rate the protocol runs at, capture and playback alike.
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per outbound capture frame. The server expects consistently
/// sized frames, so this is a protocol constant rather than a tuning knob.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Encode normalized float samples as signed 16-bit little-endian PCM.
///
/// ## Scaling:
/// Each sample is clamped to [-1.0, 1.0] first. Negative values scale by
/// 32768 and non-negative values by 32767 — the asymmetric mapping that
/// covers the full signed-16 range without overflow on either end.
pub fn encode_f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
        buffer.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    buffer
}

/// Decode a base64 PCM16 payload into normalized float samples.
///
/// ## Returns:
/// - **Ok(samples)**: each i16 divided by 32768, so values land in [-1.0, 1.0]
/// - **Err(RelayError::Decode)**: the text was not valid base64
///
/// A trailing odd byte (an incomplete sample) is silently dropped; the
/// server frames whole samples, so this only defends against truncation.
pub fn decode_base64_pcm16(text: &str) -> RelayResult<Vec<f32>> {
    let bytes = BASE64.decode(text)?;

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut samples = Vec::with_capacity(bytes.len() / 2);

    // read_i16 fails on the trailing odd byte, which ends the loop cleanly.
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    #[test]
    fn test_round_trip_within_quantization_step() {
        let original = vec![0.0f32, 0.25, -0.25, 0.9, -0.9, 1.0, -1.0];
        let encoded = BASE64.encode(encode_f32_to_pcm16(&original));
        let decoded = decode_base64_pcm16(&encoded).unwrap();

        assert_eq!(decoded.len(), original.len());
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!(
                (a - b).abs() <= 1.0 / 32768.0,
                "round trip drifted: {} vs {}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_clamp_law() {
        assert_eq!(encode_f32_to_pcm16(&[2.5]), encode_f32_to_pcm16(&[1.0]));
        assert_eq!(encode_f32_to_pcm16(&[-7.0]), encode_f32_to_pcm16(&[-1.0]));
    }

    #[test]
    fn test_asymmetric_scaling_endpoints() {
        // -1.0 maps to i16::MIN, 1.0 maps to i16::MAX
        assert_eq!(encode_f32_to_pcm16(&[-1.0]), (-32768i16).to_le_bytes());
        assert_eq!(encode_f32_to_pcm16(&[1.0]), 32767i16.to_le_bytes());
    }

    #[test]
    fn test_trailing_odd_byte_is_dropped() {
        // Three bytes: one full sample plus one dangling byte.
        let payload = BASE64.encode([0x00u8, 0x40, 0x7f]);
        let decoded = decode_base64_pcm16(&payload).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!((decoded[0] - 16384.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_base64_is_a_decode_error() {
        let err = decode_base64_pcm16("not base64!!!").unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn test_empty_payload_decodes_to_no_samples() {
        assert!(decode_base64_pcm16("").unwrap().is_empty());
    }
}
