//! # WebSocket Transport Channel
//!
//! Owns the single socket connection to the voice-platform endpoint and
//! exposes it as discrete events, so the session controller never touches
//! the socket directly.
//!
//! ## Message Format:
//! - **Client → Server**: one JSON text frame (handshake), then binary PCM16
//!   LE audio frames (16-bit, 16kHz, mono)
//! - **Server → Client**: JSON text frames (control messages, playAudio);
//!   binary frames are not expected inbound but are tolerated
//!
//! ## Lifecycle:
//! `Disconnected -> Connecting -> Connected -> Disconnected`. [`open`]
//! resolves once the socket is up; the first event delivered is always
//! [`TransportEvent::Connected`], so a handshake sent in reaction to it is
//! strictly ordered after connection confirmation. A socket-owning task then
//! pumps both directions until close or error.
//!
//! ## Send semantics:
//! [`TransportChannel::send`] drops the frame without error when the channel
//! is not `Connected`. Capture callbacks race inherently with teardown; a
//! frame lost at the boundary is indistinguishable from one lost in flight,
//! so there is nothing useful to report.

use crate::error::RelayResult;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// One discrete message unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// JSON control message
    Text(String),
    /// PCM16 LE audio buffer
    Binary(Vec<u8>),
}

/// Events surfaced to the session controller.
///
/// Each variant is a discrete input to the session's transition function,
/// which keeps the controller testable with a scripted event sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket open confirmed; safe to send the handshake
    Connected,
    /// Inbound frame (text or binary)
    Message(Frame),
    /// Socket ended, locally or remotely
    Closed,
    /// Protocol-level socket error with diagnostic detail (non-fatal to the
    /// process; a Closed event follows)
    Error(String),
}

/// Connection state of the transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelState {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
        }
    }
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

/// Outbound instructions for the socket task.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Frame(Frame),
    Shutdown,
}

/// Handle to one open WebSocket connection.
///
/// Cloning is cheap (a queue sender and shared state), which lets a capture
/// callback hold its own send handle while the socket stays inside its task.
#[derive(Clone)]
pub struct TransportChannel {
    outbound: mpsc::Sender<Outgoing>,
    state: Arc<AtomicU8>,
}

impl TransportChannel {
    /// Establish the connection and start the socket-owning task.
    ///
    /// ## Returns:
    /// The channel handle plus the event receiver the caller must drain.
    /// On open failure nothing is spawned and a Transport error is returned.
    pub async fn open(url: &str) -> RelayResult<(Self, mpsc::Receiver<TransportEvent>)> {
        let state = Arc::new(AtomicU8::new(STATE_CONNECTING));
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
        let (out_tx, out_rx) = mpsc::channel::<Outgoing>(64);

        let (socket, _response) = connect_async(url).await?;

        debug!("WebSocket open confirmed: {}", url);
        state.store(STATE_CONNECTED, Ordering::SeqCst);

        let task_state = state.clone();
        tokio::spawn(async move {
            // Delivered first, before any inbound frame can be surfaced.
            if event_tx.send(TransportEvent::Connected).await.is_err() {
                task_state.store(STATE_DISCONNECTED, Ordering::SeqCst);
                return;
            }
            run_socket(socket, out_rx, &event_tx).await;
            task_state.store(STATE_DISCONNECTED, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok((
            Self {
                outbound: out_tx,
                state,
            },
            event_rx,
        ))
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTING => ChannelState::Connecting,
            STATE_CONNECTED => ChannelState::Connected,
            _ => ChannelState::Disconnected,
        }
    }

    /// Queue a frame for transmission.
    ///
    /// Silently drops the frame when the channel is not `Connected` or the
    /// outbound queue is saturated — callers pre-check state as a best-effort
    /// guard, but the send/close race cannot be eliminated.
    pub fn send(&self, frame: Frame) {
        if self.state() != ChannelState::Connected {
            debug!("Transport not connected, dropping outbound frame");
            return;
        }
        if let Err(e) = self.outbound.try_send(Outgoing::Frame(frame)) {
            debug!("Outbound queue refused frame: {}", e);
        }
    }

    /// Request a clean close. Idempotent; safe after the socket already died.
    pub fn close(&self) {
        let _ = self.outbound.try_send(Outgoing::Shutdown);
    }

    /// Build a channel handle in a given state without a socket behind it.
    /// The paired receiver observes what `send` lets through.
    #[cfg(test)]
    pub(crate) fn detached(state: ChannelState) -> (Self, mpsc::Receiver<Outgoing>) {
        let raw = match state {
            ChannelState::Disconnected => STATE_DISCONNECTED,
            ChannelState::Connecting => STATE_CONNECTING,
            ChannelState::Connected => STATE_CONNECTED,
        };
        let (out_tx, out_rx) = mpsc::channel(64);
        (
            Self {
                outbound: out_tx,
                state: Arc::new(AtomicU8::new(raw)),
            },
            out_rx,
        )
    }
}

/// Pump both socket directions until close, error, or shutdown request.
async fn run_socket(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut out_rx: mpsc::Receiver<Outgoing>,
    event_tx: &mpsc::Sender<TransportEvent>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Frame(Frame::Text(text))) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            error!("WebSocket send failed: {}", e);
                            let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(Outgoing::Frame(Frame::Binary(data))) => {
                        if let Err(e) = ws_tx.send(Message::Binary(data)).await {
                            error!("WebSocket send failed: {}", e);
                            let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(Outgoing::Shutdown) => {
                        info!("Closing WebSocket");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    // All handles dropped — treat like a shutdown request.
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx
                            .send(TransportEvent::Message(Frame::Text(text)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Not part of the inbound protocol, but tolerated.
                        if event_tx
                            .send(TransportEvent::Message(Frame::Binary(data)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!("WebSocket closed by server: {:?}", reason);
                        break;
                    }
                    // Ping/pong are answered by the library; nothing to route.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket protocol error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
