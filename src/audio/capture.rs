//! # Microphone Capture Pipeline
//!
//! Owns the input device and produces fixed-size encoded frames. The cpal
//! callback accumulates samples until one full capture buffer is available,
//! encodes it with the PCM codec, and hands the bytes to a [`FrameSink`].
//!
//! The [`CaptureSource`] trait is the seam between the session controller
//! and the device: the real implementation acquires hardware inside
//! `start()`, so the session's state gates run before any device is touched,
//! and tests can substitute a scripted source.

use crate::audio::codec;
use crate::config::AudioSettings;
use crate::error::{RelayError, RelayResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, warn};

/// Receives one encoded PCM16 frame per full capture buffer.
///
/// Runs on the audio callback thread, so it must be cheap and non-blocking —
/// the transport send path behind it is a `try_send` onto a queue.
pub type FrameSink = Box<dyn Fn(Vec<u8>) + Send + 'static>;

/// A source of encoded microphone frames.
pub trait CaptureSource {
    /// Acquire the device and begin producing frames into `sink`.
    ///
    /// ## Errors:
    /// `RelayError::Permission` when no input device is available or the
    /// operating system refuses the stream.
    fn start(&mut self, sink: FrameSink) -> RelayResult<()>;

    /// Release the device. Safe to call repeatedly and when never started.
    fn stop(&mut self);
}

/// Real microphone capture at the protocol rate (16 kHz mono).
pub struct MicCapture {
    settings: AudioSettings,
    stream: Option<cpal::Stream>,
}

impl MicCapture {
    pub fn new(settings: AudioSettings) -> Self {
        Self {
            settings,
            stream: None,
        }
    }
}

impl CaptureSource for MicCapture {
    fn start(&mut self, sink: FrameSink) -> RelayResult<()> {
        if self.stream.is_some() {
            // Session gating should prevent this; treat as satisfied.
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            RelayError::Permission("no microphone input device available".to_string())
        })?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.settings.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_samples = self.settings.frame_samples;
        let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend_from_slice(data);
                    // Emit only whole frames; the server expects a fixed size.
                    while pending.len() >= frame_samples {
                        let frame: Vec<f32> = pending.drain(..frame_samples).collect();
                        sink(codec::encode_f32_to_pcm16(&frame));
                    }
                },
                |err| warn!("Capture stream error: {}", err),
                None,
            )
            .map_err(|e| {
                RelayError::Permission(format!("could not open microphone stream: {}", e))
            })?;

        stream
            .play()
            .map_err(|e| RelayError::Permission(format!("could not start capture: {}", e)))?;

        debug!(
            "Microphone capture started ({} Hz, {} samples/frame)",
            self.settings.sample_rate, frame_samples
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream stops the callback and releases the device.
        if self.stream.take().is_some() {
            debug!("Microphone capture stopped");
        }
    }
}

/// Scripted source used by session tests: records lifecycle calls and can
/// emit frames on demand without any device. The shared handles stay valid
/// after the source is boxed into a session.
#[cfg(test)]
pub(crate) struct ScriptedCapture {
    pub start_calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub stop_calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub sink_slot: std::sync::Arc<std::sync::Mutex<Option<FrameSink>>>,
    deny: bool,
}

#[cfg(test)]
impl ScriptedCapture {
    pub fn new(deny: bool) -> Self {
        use std::sync::atomic::AtomicUsize;
        use std::sync::{Arc, Mutex};
        Self {
            start_calls: Arc::new(AtomicUsize::new(0)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            sink_slot: Arc::new(Mutex::new(None)),
            deny,
        }
    }

    /// Push one already-encoded frame through the registered sink, if any.
    pub fn emit(slot: &std::sync::Mutex<Option<FrameSink>>, frame: Vec<u8>) {
        if let Some(sink) = slot.lock().unwrap().as_ref() {
            sink(frame);
        }
    }
}

#[cfg(test)]
impl CaptureSource for ScriptedCapture {
    fn start(&mut self, sink: FrameSink) -> RelayResult<()> {
        self.start_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.deny {
            return Err(RelayError::Permission(
                "microphone access denied".to_string(),
            ));
        }
        *self.sink_slot.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.sink_slot.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_scripted_capture_denial() {
        let mut capture = ScriptedCapture::new(true);
        let err = capture.start(Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, RelayError::Permission(_)));
        assert_eq!(capture.start_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scripted_capture_emits_through_sink() {
        let mut capture = ScriptedCapture::new(false);
        let slot = capture.sink_slot.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        capture
            .start(Box::new(move |frame| {
                seen_clone.fetch_add(frame.len(), Ordering::SeqCst);
            }))
            .unwrap();
        ScriptedCapture::emit(&slot, vec![0u8; 8]);
        assert_eq!(seen.load(Ordering::SeqCst), 8);

        // stop is re-entrant and severs the sink
        capture.stop();
        capture.stop();
        ScriptedCapture::emit(&slot, vec![0u8; 8]);
        assert_eq!(seen.load(Ordering::SeqCst), 8);
    }
}
