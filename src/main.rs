//! # Voice Relay Client - Main Application Entry Point
//!
//! Command-line stand-in for a telephony provider's client SDK: it connects
//! to the voice-platform endpoint, performs the handshake, streams the local
//! microphone as PCM16 frames, and plays back server-pushed audio until the
//! connection ends or Ctrl+C is pressed.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **error**: the relay error taxonomy
//! - **websocket**: the transport channel owning the socket
//! - **session**: the controller gating operations and routing messages
//! - **audio**: codec, microphone capture, and playback mixing

mod audio; // Codec, capture, and playback pipelines (audio/ directory)
mod config; // Configuration management (config.rs)
mod error; // Error handling types (error.rs)
mod session; // Session controller (session.rs)
mod websocket; // WebSocket transport channel (websocket.rs)

use anyhow::Result;
use audio::capture::MicCapture;
use audio::playback::SpeakerOutput;
use config::AppConfig;
use session::{ConnectionState, Session};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Connect, stream, and tear down on Ctrl+C.
///
/// The session future deliberately stays on the main task: the cpal streams
/// it owns are not `Send`, and a single event-driven session has no use for
/// extra worker tasks anyway.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Relay endpoint: {}", config.endpoint.url);

    // The session's append-only log sink; every line is a human-readable
    // event (connection changes, handshake, each raw inbound message).
    let (log_tx, mut log_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = log_rx.recv().await {
            info!(target: "session", "{}", line);
        }
    });

    let capture = Box::new(MicCapture::new(config.audio.clone()));
    let playback = Box::new(SpeakerOutput::new(config.audio.sample_rate));
    let mut session = Session::new(config, capture, playback, log_tx);

    let mut events = match session.connect().await? {
        Some(events) => events,
        // A fresh session always yields a receiver; this arm is unreachable.
        None => return Ok(()),
    };

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let was_connected =
                            session.connection_state() == ConnectionState::Connected;
                        session.handle_event(event);

                        // Start streaming as soon as the handshake is out.
                        if !was_connected
                            && session.connection_state() == ConnectionState::Connected
                        {
                            if let Err(e) = session.start_capture() {
                                error!("Capture unavailable: {}", e);
                            }
                        }

                        // No reconnect logic: a closed session ends the run.
                        if session.connection_state() == ConnectionState::Disconnected {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, closing session...");
                break;
            }
        }
    }

    session.disconnect();
    info!("Session ended");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// `RUST_LOG` controls verbosity; without it the relay's own debug output
/// is enabled and dependencies stay quiet.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
