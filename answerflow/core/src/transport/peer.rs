//! Peer Data Channel
//!
//! A peer-to-peer data channel negotiated through a plain HTTP signaling
//! call. The platform supplies the peer machinery through [`PeerConnector`];
//! this strategy only runs the exchange:
//!
//! 1. `create_offer` on the connector
//! 2. POST `{offer, ...request}` to the signaling endpoint
//! 3. read `{answer}` from the reply (a missing answer fails this strategy)
//! 4. `accept_answer` on the connector, then read one frame per message

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::decode_frame;
use super::push::status_error;
use super::traits::{ChunkFeed, TransportContext, TransportStrategy};
use crate::chunk::TransportKind;
use crate::error::TransportError;

/// An SDP offer or answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// `offer` or `answer`
    #[serde(rename = "type")]
    pub kind: String,
    /// Session description body
    pub sdp: String,
}

/// An open data channel
pub struct PeerLink {
    /// Inbound text messages, one frame each
    pub messages: mpsc::UnboundedReceiver<String>,
    /// Closes the channel and the peer connection
    pub close: Box<dyn FnOnce() + Send>,
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink").finish_non_exhaustive()
    }
}

/// Platform peer-connection support
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a local offer
    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;

    /// Apply the remote answer and open the data channel
    async fn accept_answer(&self, answer: SessionDescription) -> anyhow::Result<PeerLink>;
}

/// Peer data channel transport
#[derive(Clone)]
pub struct PeerDataChannel {
    signaling_endpoint: Option<String>,
    connect_timeout: Duration,
    http_client: reqwest::Client,
}

impl PeerDataChannel {
    /// Create a peer channel; without an endpoint it is unavailable
    #[must_use]
    pub fn new(signaling_endpoint: Option<String>, connect_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();
        Self {
            signaling_endpoint,
            connect_timeout,
            http_client,
        }
    }

    async fn signal(
        &self,
        endpoint: &str,
        ctx: &TransportContext,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let mut body = serde_json::to_value(ctx.request.as_ref())
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        let offer = serde_json::to_value(offer)
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        if let Value::Object(fields) = &mut body {
            fields.insert("offer".to_string(), offer);
        }

        let response = tokio::time::timeout(
            self.connect_timeout,
            self.http_client.post(endpoint).json(&body).send(),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let reply: Value = response.json().await?;
        let answer = reply
            .get("answer")
            .filter(|answer| !answer.is_null())
            .cloned()
            .ok_or_else(|| TransportError::Negotiation("signaling reply carried no answer".into()))?;
        serde_json::from_value(answer)
            .map_err(|e| TransportError::Negotiation(format!("invalid answer: {e}")))
    }
}

impl fmt::Debug for PeerDataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerDataChannel")
            .field("signaling_endpoint", &self.signaling_endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportStrategy for PeerDataChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::PeerDataChannel
    }

    async fn establish(&self, ctx: &TransportContext) -> Result<ChunkFeed, TransportError> {
        let Some(endpoint) = self.signaling_endpoint.as_deref() else {
            return Err(TransportError::Unavailable("no peer signaling endpoint configured".into()));
        };
        let Some(connector) = ctx.peer_connector.as_ref().map(Arc::clone) else {
            return Err(TransportError::Unavailable("no peer connector on this platform".into()));
        };

        let offer = connector
            .create_offer()
            .await
            .map_err(|e| TransportError::Negotiation(format!("offer failed: {e}")))?;
        let answer = self.signal(endpoint, ctx, &offer).await?;
        let PeerLink {
            mut messages,
            close: close_link,
        } = connector
            .accept_answer(answer)
            .await
            .map_err(|e| TransportError::Negotiation(format!("answer rejected: {e}")))?;

        let (sender, events) = ChunkFeed::channel(TransportKind::PeerDataChannel);
        let close = CancellationToken::new();
        let closing = close.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    () = closing.cancelled() => break,
                    message = messages.recv() => message,
                };
                let Some(message) = message else {
                    break;
                };
                match decode_frame(&message) {
                    Ok(frame) => {
                        if !sender.frame(frame) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(transport = %TransportKind::PeerDataChannel, error = %e, "Dropping malformed frame");
                    }
                }
            }
            debug!("Peer data channel closed");
        });

        Ok(ChunkFeed::new(events).with_teardown(move || {
            close.cancel();
            close_link();
        }))
    }
}
