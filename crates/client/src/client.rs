//! Push-channel client.
//!
//! [`PushTransport`] is the seam the transport coordinator subscribes
//! through. [`WsPushTransport`] implements it over WebSocket: it
//! connects, joins the job room, and spawns a pump task that forwards
//! parsed [`PushMessage`]s until the connection drops or the
//! [`PushSubscription`] is dropped (which leaves the room).

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::messages::{join_frame, leave_frame, parse_message, PushMessage};

/// Buffered messages per subscription before the pump applies
/// backpressure to the socket.
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 64;

/// Opens room subscriptions on a push channel.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Connect (if needed) and join the room keyed by `progress_id`.
    async fn subscribe(&self, progress_id: &str) -> Result<PushSubscription, PushError>;
}

/// A live membership in one job room.
///
/// Messages arrive through [`next`](Self::next), which returns `None`
/// once the underlying connection is gone. Dropping the subscription
/// leaves the room.
pub struct PushSubscription {
    messages: mpsc::Receiver<PushMessage>,
    leave: CancellationToken,
}

impl PushSubscription {
    /// Wrap a message receiver; `leave` is cancelled when the
    /// subscription is dropped.
    pub fn new(messages: mpsc::Receiver<PushMessage>, leave: CancellationToken) -> Self {
        Self { messages, leave }
    }

    /// Next message from the room. Cancel-safe.
    pub async fn next(&mut self) -> Option<PushMessage> {
        self.messages.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.leave.cancel();
    }
}

/// WebSocket implementation of [`PushTransport`].
pub struct WsPushTransport {
    ws_url: String,
}

impl WsPushTransport {
    /// * `ws_url` - full WebSocket endpoint, e.g. `ws://host:5000/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    /// Generates a unique `client_id` (UUID v4) and appends it as a query
    /// parameter so the server can address this client, then sends the
    /// room join frame.
    async fn subscribe(&self, progress_id: &str) -> Result<PushSubscription, PushError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}clientId={client_id}", self.ws_url);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            PushError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
        })?;

        let (mut sink, mut stream) = ws_stream.split();
        sink.send(Message::Text(join_frame(progress_id)))
            .await
            .map_err(|e| PushError::Protocol(format!("Failed to join room: {e}")))?;

        tracing::info!(
            progress_id,
            client_id = %client_id,
            "Joined push room at {}",
            self.ws_url,
        );

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let leave = CancellationToken::new();
        let leave_signal = leave.clone();
        let room = progress_id.to_string();

        tokio::spawn(async move {
            // `true` when the socket is still usable and the room should be left.
            let leave_room = loop {
                tokio::select! {
                    _ = leave_signal.cancelled() => break true,
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let forwarded = tokio::select! {
                                forwarded = forward_text(&text, &room, &tx) => forwarded,
                                _ = leave_signal.cancelled() => false,
                            };
                            if !forwarded {
                                break true;
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Handled automatically by tungstenite.
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(progress_id = %room, ?frame, "Push channel closed");
                            break false;
                        }
                        Some(Ok(_)) => {
                            // Binary / Frame - ignore.
                        }
                        Some(Err(e)) => {
                            tracing::warn!(progress_id = %room, error = %e, "Push receive error");
                            break false;
                        }
                        None => {
                            tracing::info!(progress_id = %room, "Push stream exhausted");
                            break false;
                        }
                    }
                }
            };

            if leave_room {
                let _ = sink.send(Message::Text(leave_frame(&room))).await;
                let _ = sink.close().await;
                tracing::debug!(progress_id = %room, "Left push room");
            }
        });

        Ok(PushSubscription::new(rx, leave))
    }
}

/// Parse one text frame and forward it if it belongs to `room`.
///
/// Returns `false` when the subscriber is gone.
async fn forward_text(text: &str, room: &str, tx: &mpsc::Sender<PushMessage>) -> bool {
    match parse_message(text) {
        Ok(msg) if msg.is_for(room) => {
            tracing::trace!(progress_id = %room, kind = msg.kind(), "Push message");
            tx.send(msg).await.is_ok()
        }
        Ok(msg) => {
            tracing::trace!(progress_id = %room, kind = msg.kind(), "Ignoring message for another room");
            true
        }
        Err(e) => {
            tracing::warn!(
                progress_id = %room,
                error = %e,
                raw_message = %text,
                "Failed to parse push message",
            );
            true
        }
    }
}

/// Errors that can occur when subscribing to the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
