//! # Session Controller
//!
//! Orchestrates one logical connection to the voice platform: opens the
//! transport channel, sends the handshake exactly once per connection,
//! routes inbound control frames to playback and the log sink, and enforces
//! which operations are legal in which state.
//!
//! ## Session Lifecycle:
//! 1. **Disconnected**: nothing open; connect is legal
//! 2. **Connecting**: socket opening; further connects are no-ops
//! 3. **Connected**: handshake sent; capture may start
//! 4. back to **Disconnected** on close, error, or explicit disconnect
//!
//! Streaming state (`Idle`/`Capturing`) is tracked separately with the
//! invariant that `Capturing` only holds while `Connected`.
//!
//! Every external event (socket open/message/close/error) is a discrete
//! input to [`Session::handle_event`], so the whole controller can be tested
//! by feeding a scripted event sequence — no socket, no microphone.

use crate::audio::capture::{CaptureSource, FrameSink};
use crate::audio::codec;
use crate::audio::playback::PlaybackSink;
use crate::config::{AppConfig, HandshakeConfig};
use crate::error::RelayResult;
use crate::websocket::{Frame, TransportChannel, TransportEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Streaming state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Capturing,
}

impl StreamState {
    pub fn as_str(&self) -> &str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Capturing => "capturing",
        }
    }
}

/// The single control frame establishing session identity with the server.
///
/// Built and sent exactly once per connection attempt, immediately after the
/// open confirmation, and not retained afterwards. The `callid` is freshly
/// generated per attempt; `event_timestamp` is epoch milliseconds captured
/// at send time. All other fields are opaque configuration forwarded
/// verbatim.
#[derive(Debug, Serialize)]
pub struct HandshakePayload {
    /// Nested JSON string carrying the client identifier
    pub ivr_data: String,
    /// Fresh UUID identifying this simulated call
    pub callid: String,
    pub virtual_number: String,
    pub customer_number: String,
    pub client_meta_id: String,
    /// Epoch milliseconds as a string, captured at send time
    pub event_timestamp: String,
}

impl HandshakePayload {
    pub fn build(handshake: &HandshakeConfig) -> Self {
        Self {
            ivr_data: serde_json::json!({ "clientId": handshake.client_id }).to_string(),
            callid: Uuid::new_v4().to_string(),
            virtual_number: handshake.virtual_number.clone(),
            customer_number: handshake.customer_number.clone(),
            client_meta_id: handshake.client_meta_id.clone(),
            event_timestamp: chrono::Utc::now().timestamp_millis().to_string(),
        }
    }
}

/// One logical connection to the voice platform.
///
/// Owns the transport channel, the capture source, and the playback sink.
/// Multiple independent sessions are possible in principle; the binary runs
/// exactly one.
pub struct Session {
    config: AppConfig,
    conn_state: ConnectionState,
    stream_state: StreamState,
    transport: Option<TransportChannel>,
    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackSink>,
    log: mpsc::UnboundedSender<String>,
}

impl Session {
    /// Create a session around concrete capture/playback ports.
    ///
    /// `log` is the append-only sink of human-readable event lines; it is
    /// output-only and never parsed.
    pub fn new(
        config: AppConfig,
        capture: Box<dyn CaptureSource>,
        playback: Box<dyn PlaybackSink>,
        log: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            config,
            conn_state: ConnectionState::Disconnected,
            stream_state: StreamState::Idle,
            transport: None,
            capture,
            playback,
            log,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.conn_state
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream_state
    }

    /// Open the transport channel.
    ///
    /// ## Returns:
    /// - `Ok(Some(events))`: the receiver the caller must pump into
    ///   [`Session::handle_event`]
    /// - `Ok(None)`: already connected or connecting; nothing happened
    /// - `Err(Transport)`: the socket could not be opened; state is back to
    ///   `Disconnected` and a later retry is legal
    pub async fn connect(&mut self) -> RelayResult<Option<mpsc::Receiver<TransportEvent>>> {
        if self.conn_state != ConnectionState::Disconnected {
            self.log(format!(
                "Connect ignored: session is {}",
                self.conn_state.as_str()
            ));
            return Ok(None);
        }

        self.conn_state = ConnectionState::Connecting;
        match TransportChannel::open(&self.config.endpoint.url).await {
            Ok((channel, events)) => {
                self.transport = Some(channel);
                Ok(Some(events))
            }
            Err(e) => {
                self.conn_state = ConnectionState::Disconnected;
                self.log(format!("WS error: {}", e));
                Err(e)
            }
        }
    }

    /// Feed one transport event into the session's transition function.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Message(Frame::Text(text)) => self.on_control_frame(&text),
            TransportEvent::Message(Frame::Binary(data)) => {
                // Not part of the inbound protocol; tolerated without error.
                debug!("Ignoring unexpected inbound binary frame ({} bytes)", data.len());
            }
            TransportEvent::Closed => self.on_closed(),
            TransportEvent::Error(detail) => {
                // A Closed event follows from the transport task; logging is
                // all that happens here.
                self.log(format!("WS error: {}", detail));
            }
        }
    }

    /// Start streaming microphone audio.
    ///
    /// No-op (reported via the log sink) unless the session is `Connected`
    /// and not already `Capturing`. Device acquisition happens only after
    /// the gates pass; a `Permission` failure leaves the session `Idle` and
    /// is returned to the caller.
    pub fn start_capture(&mut self) -> RelayResult<()> {
        if self.conn_state != ConnectionState::Connected {
            self.log("Cannot start mic: not connected");
            return Ok(());
        }
        if self.stream_state == StreamState::Capturing {
            self.log(format!(
                "Mic start ignored: already {}",
                self.stream_state.as_str()
            ));
            return Ok(());
        }

        let Some(channel) = self.transport.clone() else {
            self.log("Cannot start mic: no transport channel");
            return Ok(());
        };

        // The sink runs on the audio callback thread; the channel pre-checks
        // its own state so frames racing a close are dropped, not errors.
        let sink: FrameSink = Box::new(move |frame| channel.send(Frame::Binary(frame)));

        match self.capture.start(sink) {
            Ok(()) => {
                self.stream_state = StreamState::Capturing;
                self.log("Mic streaming started");
                Ok(())
            }
            Err(e) => {
                self.log(format!("Mic start failed: {}", e));
                Err(e)
            }
        }
    }

    /// Stop streaming microphone audio and release the device.
    /// No-op unless currently `Capturing`.
    pub fn stop_capture(&mut self) {
        if self.stream_state != StreamState::Capturing {
            return;
        }
        self.capture.stop();
        self.stream_state = StreamState::Idle;
        self.log("Mic streaming stopped");
    }

    /// Tear the session down. Idempotent and safe from any state, including
    /// never-connected teardown paths.
    pub fn disconnect(&mut self) {
        self.stop_capture();
        if let Some(channel) = self.transport.take() {
            channel.close();
        }
        if self.conn_state != ConnectionState::Disconnected {
            self.conn_state = ConnectionState::Disconnected;
            self.log("Disconnected");
        }
    }

    /// Open confirmation: send the handshake, then mark the session live.
    fn on_connected(&mut self) {
        self.log("WS connected");

        let payload = HandshakePayload::build(&self.config.handshake);
        match serde_json::to_string(&payload) {
            Ok(json) => {
                if let Some(channel) = &self.transport {
                    channel.send(Frame::Text(json));
                }
                self.conn_state = ConnectionState::Connected;
                self.log("Handshake sent");
            }
            Err(e) => {
                // String-only fields make this unreachable in practice.
                warn!("Handshake serialization failed: {}", e);
                self.log(format!("Handshake failed: {}", e));
            }
        }
    }

    /// Inbound text frame: play recognized audio instructions, log everything.
    ///
    /// Malformed JSON and unrecognized shapes degrade to the log line only —
    /// never an error. Recognized instructions are not suppressed from the
    /// log either; the sink sees every raw inbound message.
    fn on_control_frame(&mut self, text: &str) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
            let is_play_audio = value.get("type").and_then(|v| v.as_str()) == Some("playAudio");
            if is_play_audio {
                if let Some(content) = value
                    .pointer("/data/audioContent")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                {
                    match codec::decode_base64_pcm16(content) {
                        Ok(samples) => {
                            if let Err(e) = self.playback.play(samples) {
                                self.log(format!("Playback failed: {}", e));
                            }
                        }
                        Err(e) => {
                            // Drop the instruction; the raw frame still gets
                            // logged below.
                            self.log(format!("Dropped playAudio instruction: {}", e));
                        }
                    }
                }
            }
        }

        self.log(format!("Server msg: {}", text));
    }

    /// Remote or local close: capture cannot outlive the connection.
    fn on_closed(&mut self) {
        self.stop_capture();
        self.transport = None;
        if self.conn_state != ConnectionState::Disconnected {
            self.conn_state = ConnectionState::Disconnected;
        }
        self.log("WS closed");
    }

    fn log(&self, line: impl Into<String>) {
        // The receiver outlives the session in normal operation; a dropped
        // receiver just means nobody is watching anymore.
        let _ = self.log.send(line.into());
    }

    /// Attach a detached transport channel and mark the socket as opening,
    /// as if `connect` had succeeded. Lets tests drive `handle_event`
    /// without a real socket.
    #[cfg(test)]
    pub(crate) fn attach_transport_for_test(&mut self, channel: TransportChannel) {
        self.transport = Some(channel);
        self.conn_state = ConnectionState::Connecting;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::ScriptedCapture;
    use crate::audio::playback::RecordingSink;
    use crate::websocket::{ChannelState, Outgoing};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::sync::atomic::Ordering;

    struct Harness {
        session: Session,
        outbound: mpsc::Receiver<Outgoing>,
        log_rx: mpsc::UnboundedReceiver<String>,
        capture_starts: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        capture_stops: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        played: std::sync::Arc<std::sync::Mutex<Vec<Vec<f32>>>>,
    }

    /// Build a session wired to scripted ports and a detached transport in
    /// the given state. `attached == false` leaves the session fully
    /// disconnected (no transport at all).
    fn harness(attached: bool) -> Harness {
        let capture = ScriptedCapture::new(false);
        let capture_starts = capture.start_calls.clone();
        let capture_stops = capture.stop_calls.clone();
        let playback = RecordingSink::new();
        let played = playback.played.clone();
        let (log_tx, log_rx) = mpsc::unbounded_channel();

        let mut session = Session::new(
            AppConfig::default(),
            Box::new(capture),
            Box::new(playback),
            log_tx,
        );

        let (channel, outbound) = TransportChannel::detached(ChannelState::Connected);
        if attached {
            session.attach_transport_for_test(channel);
        }

        Harness {
            session,
            outbound,
            log_rx,
            capture_starts,
            capture_stops,
            played,
        }
    }

    fn drain_log(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn outbound_text(rx: &mut mpsc::Receiver<Outgoing>) -> Option<String> {
        match rx.try_recv() {
            Ok(Outgoing::Frame(Frame::Text(text))) => Some(text),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_connected_event_sends_one_handshake() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);

        let frame = outbound_text(&mut h.outbound).expect("handshake frame");
        let payload: serde_json::Value = serde_json::from_str(&frame).unwrap();

        // callid parses as a UUID
        let callid = payload["callid"].as_str().unwrap();
        assert!(Uuid::parse_str(callid).is_ok());

        // timestamp is epoch millis close to now
        let ts: i64 = payload["event_timestamp"].as_str().unwrap().parse().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        assert!((now - ts).abs() < 5_000, "timestamp {} vs now {}", ts, now);

        // ivr_data nests the configured client id
        let ivr: serde_json::Value =
            serde_json::from_str(payload["ivr_data"].as_str().unwrap()).unwrap();
        assert_eq!(
            ivr["clientId"].as_str().unwrap(),
            AppConfig::default().handshake.client_id
        );

        // exactly one frame, and the session is now live
        assert!(h.outbound.try_recv().is_err());
        assert_eq!(h.session.connection_state(), ConnectionState::Connected);

        let log = drain_log(&mut h.log_rx);
        assert!(log.iter().any(|l| l == "WS connected"));
        assert!(log.iter().any(|l| l == "Handshake sent"));
    }

    #[test]
    fn test_callid_is_unique_per_connection_attempt() {
        let config = AppConfig::default();
        let a = HandshakePayload::build(&config.handshake);
        let b = HandshakePayload::build(&config.handshake);
        assert!(!a.callid.is_empty());
        assert_ne!(a.callid, b.callid);
    }

    #[tokio::test]
    async fn test_play_audio_instruction_plays_once_and_sends_nothing() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        outbound_text(&mut h.outbound);

        // base64 of 4 zero samples (8 zero bytes)
        let content = BASE64.encode([0u8; 8]);
        let frame = format!(r#"{{"type":"playAudio","data":{{"audioContent":"{}"}}}}"#, content);
        h.session
            .handle_event(TransportEvent::Message(Frame::Text(frame)));

        let played = h.played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0], vec![0.0f32; 4]);
        drop(played);

        // no outbound frame generated, raw message still logged
        assert!(h.outbound.try_recv().is_err());
        let log = drain_log(&mut h.log_rx);
        assert!(log.iter().any(|l| l.starts_with("Server msg: ")));
    }

    #[tokio::test]
    async fn test_invalid_json_degrades_to_one_log_line() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        drain_log(&mut h.log_rx);

        h.session.handle_event(TransportEvent::Message(Frame::Text(
            "not valid json".to_string(),
        )));

        let log = drain_log(&mut h.log_rx);
        assert_eq!(log, vec!["Server msg: not valid json".to_string()]);
        assert!(h.played.lock().unwrap().is_empty());
        assert_eq!(h.session.connection_state(), ConnectionState::Connected);
        assert_eq!(h.session.stream_state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_audio_content_is_dropped_but_logged() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        drain_log(&mut h.log_rx);

        let frame = r#"{"type":"playAudio","data":{"audioContent":"%%%not-base64%%%"}}"#;
        h.session
            .handle_event(TransportEvent::Message(Frame::Text(frame.to_string())));

        assert!(h.played.lock().unwrap().is_empty());
        let log = drain_log(&mut h.log_rx);
        assert!(log.iter().any(|l| l.starts_with("Dropped playAudio instruction")));
        assert!(log.iter().any(|l| l.starts_with("Server msg: ")));
    }

    #[tokio::test]
    async fn test_unrecognized_message_is_logged_without_playback() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        drain_log(&mut h.log_rx);

        h.session.handle_event(TransportEvent::Message(Frame::Text(
            r#"{"type":"callStatus","status":"ringing"}"#.to_string(),
        )));

        assert!(h.played.lock().unwrap().is_empty());
        let log = drain_log(&mut h.log_rx);
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("Server msg: "));
    }

    #[tokio::test]
    async fn test_start_capture_while_disconnected_touches_no_device() {
        let mut h = harness(false);

        h.session.start_capture().unwrap();

        assert_eq!(h.capture_starts.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.stream_state(), StreamState::Idle);
        let log = drain_log(&mut h.log_rx);
        assert!(log.iter().any(|l| l.contains("not connected")));
    }

    #[tokio::test]
    async fn test_capture_state_gates() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);

        // stop before start: nothing happens
        h.session.stop_capture();
        assert_eq!(h.capture_stops.load(Ordering::SeqCst), 0);

        h.session.start_capture().unwrap();
        assert_eq!(h.session.stream_state(), StreamState::Capturing);
        assert_eq!(h.capture_starts.load(Ordering::SeqCst), 1);

        // second start is a gated no-op
        h.session.start_capture().unwrap();
        assert_eq!(h.capture_starts.load(Ordering::SeqCst), 1);

        h.session.stop_capture();
        assert_eq!(h.session.stream_state(), StreamState::Idle);
        assert_eq!(h.capture_stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permission_denial_leaves_session_idle() {
        let capture = ScriptedCapture::new(true);
        let starts = capture.start_calls.clone();
        let playback = RecordingSink::new();
        let (log_tx, mut log_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(
            AppConfig::default(),
            Box::new(capture),
            Box::new(playback),
            log_tx,
        );
        let (channel, _outbound) = TransportChannel::detached(ChannelState::Connected);
        session.attach_transport_for_test(channel);
        session.handle_event(TransportEvent::Connected);

        assert!(session.start_capture().is_err());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(session.stream_state(), StreamState::Idle);
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        let log = drain_log(&mut log_rx);
        assert!(log.iter().any(|l| l.contains("Mic start failed")));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        h.session.start_capture().unwrap();

        h.session.disconnect();
        assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(h.session.stream_state(), StreamState::Idle);
        assert_eq!(h.capture_stops.load(Ordering::SeqCst), 1);

        // second disconnect: same end state, no duplicate teardown
        h.session.disconnect();
        assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(h.session.stream_state(), StreamState::Idle);
        assert_eq!(h.capture_stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_close_stops_capture() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        h.session.start_capture().unwrap();

        h.session.handle_event(TransportEvent::Closed);

        assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(h.session.stream_state(), StreamState::Idle);
        assert_eq!(h.capture_stops.load(Ordering::SeqCst), 1);
        let log = drain_log(&mut h.log_rx);
        assert!(log.iter().any(|l| l == "WS closed"));
    }

    #[tokio::test]
    async fn test_inbound_binary_frame_is_tolerated() {
        let mut h = harness(true);
        h.session.handle_event(TransportEvent::Connected);
        drain_log(&mut h.log_rx);

        h.session
            .handle_event(TransportEvent::Message(Frame::Binary(vec![1, 2, 3])));

        assert!(h.played.lock().unwrap().is_empty());
        assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    }
}
