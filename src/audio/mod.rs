//! # Audio Pipeline Module
//!
//! Everything between the sound hardware and the wire:
//! - **Codec**: pure f32 ↔ PCM16-LE conversion plus base64 decoding
//! - **Capture**: microphone input producing fixed-size encoded frames
//! - **Playback**: shared output stream mixing server-pushed audio
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod capture; // Microphone capture and frame accumulation
pub mod codec; // PCM wire format conversions
pub mod playback; // Output mixing for playAudio instructions
