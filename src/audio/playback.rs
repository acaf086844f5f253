//! # Audio Playback Pipeline
//!
//! Plays decoded server audio through the local output device. One shared
//! cpal output stream at the protocol rate is created lazily on the first
//! playAudio instruction and reused for the life of the session.
//!
//! Playback is fire-and-forget with no queue: each instruction becomes a
//! voice in a mix list that the output callback sums, so overlapping
//! instructions play concurrently instead of serializing. There is no
//! cancellation of in-flight audio. Both behaviors are deliberate — the
//! server paces its own audio and the protocol has no stop instruction.

use crate::error::{RelayError, RelayResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A consumer of decoded playback audio.
///
/// The seam exists for the same reason as `CaptureSource`: session tests
/// substitute a recording sink instead of a sound card.
pub trait PlaybackSink {
    /// Schedule immediate playback of normalized samples at the protocol rate.
    fn play(&mut self, samples: Vec<f32>) -> RelayResult<()>;
}

/// One in-flight playback instruction.
struct Voice {
    samples: Vec<f32>,
    position: usize,
}

/// Real speaker output backed by a lazily created cpal stream.
pub struct SpeakerOutput {
    sample_rate: u32,
    voices: Arc<Mutex<Vec<Voice>>>,
    stream: Option<cpal::Stream>,
}

impl SpeakerOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            voices: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        }
    }

    /// Create the shared output stream on first use.
    fn ensure_stream(&mut self) -> RelayResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            RelayError::Permission("no audio output device available".to_string())
        })?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let voices = self.voices.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for slot in out.iter_mut() {
                        *slot = 0.0;
                    }
                    let Ok(mut voices) = voices.lock() else {
                        return;
                    };
                    for voice in voices.iter_mut() {
                        for slot in out.iter_mut() {
                            if voice.position >= voice.samples.len() {
                                break;
                            }
                            *slot += voice.samples[voice.position];
                            voice.position += 1;
                        }
                    }
                    voices.retain(|v| v.position < v.samples.len());
                },
                |err| warn!("Playback stream error: {}", err),
                None,
            )
            .map_err(|e| {
                RelayError::Permission(format!("could not open output stream: {}", e))
            })?;

        stream
            .play()
            .map_err(|e| RelayError::Permission(format!("could not start playback: {}", e)))?;

        debug!("Playback output opened at {} Hz", self.sample_rate);
        self.stream = Some(stream);
        Ok(())
    }
}

impl PlaybackSink for SpeakerOutput {
    fn play(&mut self, samples: Vec<f32>) -> RelayResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.ensure_stream()?;
        let mut voices = self
            .voices
            .lock()
            .map_err(|_| RelayError::Permission("playback mixer lock poisoned".to_string()))?;
        voices.push(Voice {
            samples,
            position: 0,
        });
        Ok(())
    }
}

/// Recording sink for tests: stores every buffer it is asked to play.
#[cfg(test)]
pub(crate) struct RecordingSink {
    pub played: std::sync::Arc<std::sync::Mutex<Vec<Vec<f32>>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self {
            played: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

#[cfg(test)]
impl PlaybackSink for RecordingSink {
    fn play(&mut self, samples: Vec<f32>) -> RelayResult<()> {
        self.played.lock().unwrap().push(samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_collects_buffers() {
        let mut sink = RecordingSink::new();
        let played = sink.played.clone();
        sink.play(vec![0.0, 0.5]).unwrap();
        sink.play(vec![-0.5]).unwrap();
        let played = played.lock().unwrap();
        assert_eq!(played.len(), 2);
        assert_eq!(played[0].len(), 2);
    }

    #[test]
    fn test_voice_mixing_retires_finished_voices() {
        // Exercise the mix loop logic directly, without a device.
        let mut voices = vec![
            Voice {
                samples: vec![0.25, 0.25],
                position: 0,
            },
            Voice {
                samples: vec![0.5],
                position: 0,
            },
        ];
        let mut out = [0.0f32; 2];
        for voice in voices.iter_mut() {
            for slot in out.iter_mut() {
                if voice.position >= voice.samples.len() {
                    break;
                }
                *slot += voice.samples[voice.position];
                voice.position += 1;
            }
        }
        voices.retain(|v| v.position < v.samples.len());

        assert_eq!(out, [0.75, 0.25]);
        assert!(voices.is_empty());
    }
}
