//! Duplex message channel.
//!
//! ```text
//! ┌────────────────┐  send()          ┌──────────────────┐     ┌────────────────┐
//! │ ChannelHandle  │─────────────────▶│ outbound (mpsc)  │────▶│ WebSocket task │──▶ server
//! │                │  send_control()  │ control (mpsc)   │────▶│                │
//! │                │  close()         │ shutdown (once)  │────▶│                │
//! └────────────────┘                  └──────────────────┘     └───────┬────────┘
//!                                                                      │
//!                                ChannelEvent (unbounded mpsc) ◀───────┘
//! ```
//!
//! `ChannelHandle::send` never blocks, so it can be called from an audio
//! callback; when the bounded outbound queue is full the frame is refused.
//! Control messages go through `send_control`, which is unbounded and never
//! refuses while the channel is open.  Everything queued before `close` is
//! flushed before the close frame goes out: outbound frames first, then
//! control messages.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use crate::config::ChannelConfig;

/// How long to wait for the server to answer a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors raised by the channel layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("channel connect failed: {0}")]
    Connect(String),

    #[error("channel connect timed out")]
    Timeout,

    #[error("channel is closed")]
    Closed,

    #[error("channel outbound queue is full")]
    Full,
}

/// Something the channel reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One inbound text frame.
    Message(String),
    /// Transport error.  No further events follow.
    Failed(String),
    /// The remote closed the channel (or the stream ended).  No further
    /// events follow.
    Closed { code: Option<u16>, reason: String },
}

/// Close code and reason for a locally initiated close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

impl CloseRequest {
    fn normal() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
        }
    }
}

/// Sending half of an open channel.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<String>,
    control: mpsc::UnboundedSender<String>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<CloseRequest>>>>,
}

/// The transport's ends of a [`ChannelHandle`].
#[derive(Debug)]
pub struct ChannelTransport {
    pub outbound: mpsc::Receiver<String>,
    pub control: mpsc::UnboundedReceiver<String>,
    pub shutdown: oneshot::Receiver<CloseRequest>,
}

impl ChannelHandle {
    /// A handle and the transport ends it feeds.
    pub fn pair(capacity: usize) -> (ChannelHandle, ChannelTransport) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            ChannelHandle {
                outbound: outbound_tx,
                control: control_tx,
                shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
            },
            ChannelTransport {
                outbound: outbound_rx,
                control: control_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    /// Queue one text frame.  Fails instead of waiting when the queue is
    /// full.
    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        if self.is_closing() {
            return Err(ChannelError::Closed);
        }
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Queue one control message.  Unlike [`send`](Self::send) this never
    /// fails because of a backlog, only when the channel is closing.
    pub fn send_control(&self, text: String) -> Result<(), ChannelError> {
        if self.is_closing() {
            return Err(ChannelError::Closed);
        }
        self.control.send(text).map_err(|_| ChannelError::Closed)
    }

    /// Request a close with `code` and `reason`.  Only the first call on any
    /// clone has an effect.
    pub fn close(&self, code: u16, reason: &str) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(CloseRequest {
                code,
                reason: reason.to_string(),
            });
        }
    }

    /// `true` once `close` was called or the transport went away.
    pub fn is_closing(&self) -> bool {
        self.outbound.is_closed()
            || self
                .shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none()
    }
}

// ---------------------------------------------------------------------------
// ChannelConnector trait
// ---------------------------------------------------------------------------

/// Opens a channel to an endpoint.  Returns once the channel is open.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError>;
}

// ---------------------------------------------------------------------------
// WebSocketConnector
// ---------------------------------------------------------------------------

/// [`ChannelConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    capacity: usize,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            capacity: config.outbound_capacity,
            connect_timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError> {
        log::debug!("channel: connecting to {}", without_query(endpoint));

        let (ws, _response) = timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        log::info!("channel: open");

        let (handle, transport) = ChannelHandle::pair(self.capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_channel(ws, transport, events_tx));
        Ok((handle, events_rx))
    }
}

/// Strip the query string, which carries the publisher token.
fn without_query(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

/// Pump one WebSocket until either side closes it.
async fn run_channel<S, E>(
    ws: S,
    transport: ChannelTransport,
    events: mpsc::UnboundedSender<ChannelEvent>,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Unpin + Send,
    E: std::fmt::Display,
{
    let (mut sink, mut stream) = ws.split();
    let ChannelTransport {
        mut outbound,
        mut control,
        mut shutdown,
    } = transport;

    loop {
        tokio::select! {
            biased;

            request = &mut shutdown => {
                // A dropped handle closes normally.
                let request = request.unwrap_or_else(|_| CloseRequest::normal());

                let mut pending = Vec::new();
                while let Ok(text) = outbound.try_recv() {
                    pending.push(text);
                }
                while let Ok(text) = control.try_recv() {
                    pending.push(text);
                }
                for text in pending {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        log::warn!("channel: flush before close failed: {e}");
                        break;
                    }
                }

                log::debug!("channel: closing ({} {})", request.code, request.reason);
                let frame = CloseFrame {
                    code: CloseCode::from(request.code),
                    reason: request.reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    log::debug!("channel: close frame not sent: {e}");
                    break;
                }

                // Let the server acknowledge.
                let _ = timeout(CLOSE_GRACE, async {
                    while let Some(Ok(msg)) = stream.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                })
                .await;
                break;
            }

            Some(text) = control.recv() => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    log::error!("channel: send failed: {e}");
                    let _ = events.send(ChannelEvent::Failed(e.to_string()));
                    break;
                }
            }

            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    log::error!("channel: send failed: {e}");
                    let _ = events.send(ChannelEvent::Failed(e.to_string()));
                    break;
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(ChannelEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, String::new()));
                        log::info!("channel: closed by remote ({code:?} {reason})");
                        let _ = events.send(ChannelEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        log::debug!("channel: ignoring {} byte binary frame", bytes.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("channel: {e}");
                        let _ = events.send(ChannelEvent::Failed(e.to_string()));
                        break;
                    }
                    None => {
                        log::info!("channel: stream ended");
                        let _ = events.send(ChannelEvent::Closed {
                            code: None,
                            reason: String::new(),
                        });
                        break;
                    }
                }
            }
        }
    }

    log::debug!("channel: task finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
