//! Socket Channel
//!
//! Opens a WebSocket, sends the request as one JSON text message and reads
//! one frame per inbound message. Requires the `websocket` feature; without
//! it the strategy always reports itself unavailable.

use std::time::Duration;

use async_trait::async_trait;

use super::traits::{ChunkFeed, TransportContext, TransportStrategy};
use crate::chunk::TransportKind;
use crate::error::TransportError;

/// WebSocket transport
#[derive(Debug, Clone)]
pub struct SocketChannel {
    endpoint: Option<String>,
    connect_timeout: Duration,
}

impl SocketChannel {
    /// Create a socket channel; without an endpoint it is unavailable
    #[must_use]
    pub fn new(endpoint: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }
}

#[async_trait]
impl TransportStrategy for SocketChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::SocketChannel
    }

    async fn establish(&self, ctx: &TransportContext) -> Result<ChunkFeed, TransportError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(TransportError::Unavailable("no socket endpoint configured".into()));
        };

        connect(endpoint, ctx, self.connect_timeout).await
    }
}

#[cfg(not(feature = "websocket"))]
async fn connect(
    _endpoint: &str,
    _ctx: &TransportContext,
    _connect_timeout: Duration,
) -> Result<ChunkFeed, TransportError> {
    Err(TransportError::Unavailable(
        "built without websocket support".into(),
    ))
}

#[cfg(feature = "websocket")]
async fn connect(
    endpoint: &str,
    ctx: &TransportContext,
    connect_timeout: Duration,
) -> Result<ChunkFeed, TransportError> {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, warn};

    use super::frame::decode_frame;
    use crate::error::StreamError;

    let (socket, _response) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(endpoint))
        .await
        .map_err(|_| TransportError::Timeout(connect_timeout))?
        .map_err(|e| match e {
            WsError::Http(response) => {
                TransportError::Handshake(format!("server answered {}", response.status()))
            }
            other => TransportError::Connect(other.to_string()),
        })?;

    let (mut sink, mut stream) = socket.split();
    let payload = serde_json::to_string(ctx.request.as_ref())
        .map_err(|e| TransportError::Handshake(format!("request not serializable: {e}")))?;
    sink.send(Message::Text(payload))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let (sender, events) = ChunkFeed::channel(TransportKind::SocketChannel);
    let close = CancellationToken::new();
    let closing = close.clone();

    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                () = closing.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                next = stream.next() => next,
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    sender.fail(StreamError::Transport {
                        transport: TransportKind::SocketChannel,
                        reason: e.to_string(),
                    });
                    break;
                }
            };

            match decode_frame(&text) {
                Ok(frame) => {
                    if !sender.frame(frame) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(transport = %TransportKind::SocketChannel, error = %e, "Dropping malformed frame");
                }
            }
        }
        debug!("Socket channel closed");
    });

    Ok(ChunkFeed::new(events).with_teardown(move || close.cancel()))
}
