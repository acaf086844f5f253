//! # Configuration Management
//!
//! Loads relay client configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with RELAY_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `WS_URL` environment variable (short endpoint override)
//! 2. Environment variables (RELAY_ENDPOINT__URL, RELAY_HANDSHAKE__CLIENT_ID, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The handshake fields are opaque strings forwarded verbatim to the server;
//! the defaults are the well-known values the QA voice-agent endpoint accepts,
//! so the binary works against the test server with no configuration at all.

use crate::audio::codec;
use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub handshake: HandshakeConfig,
    pub audio: AudioSettings,
}

/// Remote endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// WebSocket URL of the voice-platform endpoint (ws:// or wss://)
    pub url: String,
}

/// Opaque identity fields sent once per connection in the handshake frame.
///
/// The relay forwards these verbatim; it assumes nothing about their
/// semantics beyond "the server wants them".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Client identifier embedded in the ivr_data payload
    pub client_id: String,

    /// Virtual number the simulated call arrives on
    pub virtual_number: String,

    /// Customer number the simulated call originates from
    pub customer_number: String,

    /// Client metadata identifier
    pub client_meta_id: String,
}

/// Audio pipeline settings.
///
/// ## Protocol constraints:
/// The server expects 16 kHz mono PCM16 and consistently sized frames, so
/// these values are configuration in name only — changing them means talking
/// to a different server build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Capture and playback sample rate in Hz
    pub sample_rate: u32,

    /// Samples per outbound capture frame (one binary frame per full buffer)
    pub frame_samples: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig {
                url: "wss://qa-knowlarity-service.exei.ai/socket".to_string(),
            },
            handshake: HandshakeConfig {
                client_id: "bbcf235b-f3c2-405f-aa57-2a4f9fed7bc6".to_string(),
                virtual_number: "9999999999".to_string(),
                customer_number: "8888888888".to_string(),
                client_meta_id: "meta_001".to_string(),
            },
            audio: AudioSettings {
                sample_rate: codec::SAMPLE_RATE,
                frame_samples: codec::CAPTURE_FRAME_SAMPLES,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `RELAY_ENDPOINT__URL=wss://host/socket`: override the endpoint
    /// - `RELAY_HANDSHAKE__CLIENT_ID=...`: override the client identifier
    /// - `WS_URL=wss://host/socket`: shorthand endpoint override
    ///
    /// The double underscore separates nesting levels, so field names that
    /// contain underscores (client_id, frame_samples) stay addressable.
    pub fn load() -> RelayResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("RELAY").separator("__"));

        // Short form for the most commonly overridden value.
        if let Ok(url) = env::var("WS_URL") {
            settings = settings.set_override("endpoint.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching these early produces a clear startup error instead of an
    /// opaque connect failure or a rejected handshake.
    pub fn validate(&self) -> RelayResult<()> {
        if !self.endpoint.url.starts_with("ws://") && !self.endpoint.url.starts_with("wss://") {
            return Err(RelayError::Config(format!(
                "endpoint URL must use the ws:// or wss:// scheme, got '{}'",
                self.endpoint.url
            )));
        }

        if self.handshake.client_id.is_empty() {
            return Err(RelayError::Config(
                "handshake client_id cannot be empty".to_string(),
            ));
        }

        if self.audio.sample_rate == 0 {
            return Err(RelayError::Config(
                "audio sample rate must be greater than 0".to_string(),
            ));
        }

        if self.audio.frame_samples == 0 {
            return Err(RelayError::Config(
                "capture frame size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
