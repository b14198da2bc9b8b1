//! # Realtime Session Client
//!
//! Owns the WebSocket connection to the remote realtime-conversation endpoint.
//!
//! ## Connection Layout:
//! ```text
//!                    ┌──────────── writer task ────────────┐
//! RemoteLink::send ──► unbounded channel ──► ws sink (Text) │
//!                    └─────────────────────────────────────┘
//!                    ┌──────────── reader task ────────────┐
//! ws stream (Text) ──► decode ──► RemoteSignal channel ──► session actor
//!                    └─────────────────────────────────────┘
//! ```
//!
//! There is no reconnect: when either task ends, the session receives a terminal
//! `RemoteSignal` and tears itself down.

use crate::config::RealtimeConfig;
use crate::error::{RelayError, RelayResult};
use crate::realtime::messages::{decode_server_event, event_type, ClientCommand, ServerEvent, SessionConfig};

use base64::prelude::*;
use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// What the reader task reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteSignal {
    /// A decoded server event
    Event(ServerEvent),
    /// A frame that could not be decoded; the connection stays up
    Malformed(RelayError),
    /// The remote side closed the connection (with the close reason, if any)
    Closed(Option<String>),
    /// The connection failed
    Failed(RelayError),
}

/// Outbound operations on a realtime connection.
///
/// ## Why a trait:
/// The session actor and the teardown logic only need these operations, so tests
/// can swap the real WebSocket for an in-memory recorder.
pub trait RemoteLink {
    /// Queue one command for the remote endpoint.
    fn send(&self, command: ClientCommand) -> RelayResult<()>;

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;

    /// Close the connection. Closing an already closed link is an error.
    fn close(&mut self) -> RelayResult<()>;

    /// Forward captured PCM as a base64 `input_audio_buffer.append`.
    fn send_audio_chunk(&self, bytes: &[u8]) -> RelayResult<()> {
        self.send(ClientCommand::append_audio(BASE64_STANDARD.encode(bytes)))
    }

    fn send_cancel(&self) -> RelayResult<()> {
        self.send(ClientCommand::cancel())
    }

    fn send_truncate(&self, item_id: &str, played_ms: u64) -> RelayResult<()> {
        self.send(ClientCommand::truncate(item_id, played_ms))
    }

    fn send_context_message(&self, text: &str) -> RelayResult<()> {
        self.send(ClientCommand::context_message(text))
    }

    fn send_session_update(&self, session: SessionConfig) -> RelayResult<()> {
        self.send(ClientCommand::session_update(session))
    }
}

/// A dialed link plus the signals it will deliver.
pub type RemoteSession = (Box<dyn RemoteLink>, mpsc::UnboundedReceiver<RemoteSignal>);

/// Opens realtime connections for a relay session.
pub trait RemoteConnector {
    fn connect(&self, config: &RealtimeConfig) -> LocalBoxFuture<'static, RelayResult<RemoteSession>>;
}

/// Dials the configured realtime endpoint over WebSocket.
pub struct RealtimeConnector;

impl RemoteConnector for RealtimeConnector {
    fn connect(&self, config: &RealtimeConfig) -> LocalBoxFuture<'static, RelayResult<RemoteSession>> {
        let config = config.clone();
        async move {
            let (connection, signals) = RealtimeConnection::connect(&config).await?;
            Ok((Box::new(connection) as Box<dyn RemoteLink>, signals))
        }
        .boxed_local()
    }
}

/// Messages consumed by the writer task.
#[derive(Debug)]
enum Outbound {
    Command(ClientCommand),
    Close,
}

/// A live connection to the realtime endpoint.
pub struct RealtimeConnection {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl RealtimeConnection {
    /// Connect to `config.endpoint()` and start the reader and writer tasks.
    ///
    /// ## Headers:
    /// - `Authorization: Bearer <api_key>`
    /// - `OpenAI-Beta: realtime=v1`
    ///
    /// ## Returns:
    /// The connection handle plus the receiver the session consumes as a stream.
    pub async fn connect(
        config: &RealtimeConfig,
    ) -> RelayResult<(Self, mpsc::UnboundedReceiver<RemoteSignal>)> {
        let mut request = config
            .endpoint()
            .into_client_request()
            .map_err(|e| RelayError::Transport(format!("Invalid realtime URL: {}", e)))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| RelayError::Transport(format!("Invalid API key header: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to connect: {}", e)))?;

        info!("Connected to realtime endpoint {}", config.url);

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<RemoteSignal>();
        let open = Arc::new(AtomicBool::new(true));

        // Writer task: serialize commands in the order they were queued
        let writer_signals = signal_tx.clone();
        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Command(command) => {
                        let json = match serde_json::to_string(&command) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", command.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            error!("Failed to send {}: {}", command.kind(), e);
                            writer_open.store(false, Ordering::SeqCst);
                            let _ = writer_signals
                                .send(RemoteSignal::Failed(RelayError::Transport(e.to_string())));
                            break;
                        }
                    }
                    Outbound::Close => {
                        debug!("Closing realtime connection");
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        // Reader task: decode frames until the connection ends
        let reader_open = open.clone();
        tokio::spawn(async move {
            let terminal = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match decode_server_event(&text) {
                        Ok(event) => {
                            if signal_tx.send(RemoteSignal::Event(event)).is_err() {
                                // Session is gone; nobody to report to
                                break None;
                            }
                        }
                        Err(e) => {
                            let fault = RelayError::Protocol(format!(
                                "Failed to parse realtime event {:?}: {}",
                                event_type(&text),
                                e
                            ));
                            warn!("{}", fault);
                            if signal_tx.send(RemoteSignal::Malformed(fault)).is_err() {
                                break None;
                            }
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        info!("Realtime connection closed by server: {:?}", reason);
                        break Some(RemoteSignal::Closed(reason));
                    }
                    Some(Ok(_)) => {
                        // Ping/pong and binary frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        error!("Realtime connection error: {}", e);
                        break Some(RemoteSignal::Failed(RelayError::Transport(e.to_string())));
                    }
                    None => break Some(RemoteSignal::Closed(None)),
                }
            };

            reader_open.store(false, Ordering::SeqCst);
            if let Some(signal) = terminal {
                let _ = signal_tx.send(signal);
            }
        });

        Ok((
            Self {
                outbound: outbound_tx,
                open,
            },
            signal_rx,
        ))
    }
}

impl RemoteLink for RealtimeConnection {
    fn send(&self, command: ClientCommand) -> RelayResult<()> {
        if !self.is_open() {
            return Err(RelayError::Transport(format!(
                "Cannot send {}: realtime connection is not open",
                command.kind()
            )));
        }

        self.outbound
            .send(Outbound::Command(command))
            .map_err(|_| RelayError::Transport("Realtime writer task has stopped".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn close(&mut self) -> RelayResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(RelayError::Transport("Realtime connection already closed".to_string()));
        }

        self.outbound
            .send(Outbound::Close)
            .map_err(|_| RelayError::Transport("Realtime writer task has stopped".to_string()))
    }
}
