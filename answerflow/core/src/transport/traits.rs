//! Transport Traits
//!
//! A [`TransportStrategy`] either establishes a [`ChunkFeed`] for a request or
//! fails with a [`TransportError`]. Establishment covers everything up to the
//! first byte of content (connect, handshake, offer/answer, resolving the
//! fallback answer); after that, content and mid-stream failures travel
//! through the feed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::frame::WireFrame;
use super::peer::PeerConnector;
use crate::chunk::{ChunkPayload, StreamChunk, TransportKind};
use crate::error::{StreamError, TransportError};
use crate::request::{FallbackResolver, StreamRequest};
use crate::session::Teardown;

/// Everything a strategy may use to establish a feed
#[derive(Clone)]
pub struct TransportContext {
    /// The request being answered
    pub request: Arc<StreamRequest>,
    /// Last-resort answer producer
    pub resolver: FallbackResolver,
    /// Session-wide cancellation
    pub cancel: CancellationToken,
    /// Platform peer-connection support, if any
    pub peer_connector: Option<Arc<dyn PeerConnector>>,
}

impl fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportContext")
            .field("conversation_id", &self.request.conversation_id)
            .field("message_id", &self.request.message_id)
            .field("peer_connector", &self.peer_connector.is_some())
            .finish_non_exhaustive()
    }
}

/// One event on an established feed
#[derive(Clone, Debug)]
pub enum FeedEvent {
    /// Content for the session
    Chunk(StreamChunk),
    /// The stream failed after establishment
    Failed(StreamError),
}

/// Producer half of a feed; stamps chunks with its transport
#[derive(Clone, Debug)]
pub struct FeedSender {
    tx: mpsc::UnboundedSender<FeedEvent>,
    transport: TransportKind,
}

impl FeedSender {
    /// Send a payload; `false` once the consumer is gone
    pub fn chunk(&self, payload: ChunkPayload) -> bool {
        self.tx
            .send(FeedEvent::Chunk(StreamChunk::new(self.transport, payload)))
            .is_ok()
    }

    /// Report a mid-stream failure; `false` once the consumer is gone
    pub fn fail(&self, error: StreamError) -> bool {
        self.tx.send(FeedEvent::Failed(error)).is_ok()
    }

    /// Forward a decoded wire frame
    pub fn frame(&self, frame: WireFrame) -> bool {
        match frame {
            WireFrame::Payload(payload) => self.chunk(payload),
            WireFrame::Failed(detail) => self.fail(StreamError::Remote(detail)),
        }
    }

    /// Whether the consumer has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An established source of chunks
pub struct ChunkFeed {
    /// Events in delivery order; closing the channel ends the stream
    pub events: mpsc::UnboundedReceiver<FeedEvent>,
    /// Releases the transport's resources
    pub teardown: Option<Teardown>,
}

impl ChunkFeed {
    /// Create a feed channel for `transport`
    #[must_use]
    pub fn channel(transport: TransportKind) -> (FeedSender, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FeedSender { tx, transport }, rx)
    }

    /// Feed without a teardown
    #[must_use]
    pub fn new(events: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self {
            events,
            teardown: None,
        }
    }

    /// Attach a teardown
    #[must_use]
    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.teardown = Some(Box::new(teardown));
        self
    }
}

impl fmt::Debug for ChunkFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkFeed")
            .field("teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}

/// One way of obtaining a chunk feed
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Establish a feed for `ctx.request`
    ///
    /// Returns [`TransportError::Unavailable`] when required configuration or
    /// platform capability is missing.
    async fn establish(&self, ctx: &TransportContext) -> Result<ChunkFeed, TransportError>;
}
