//! Transport Strategies
//!
//! Each strategy is one way of obtaining a chunk feed for a request:
//!
//! - [`PushChannel`]: HTTP POST answered with server-sent events
//! - [`SocketChannel`]: WebSocket (feature `websocket`)
//! - [`PeerDataChannel`]: peer data channel negotiated over HTTP signaling
//! - [`LocalFallback`]: the caller's fallback resolver played back locally
//!
//! The coordinator tries them in preference order; see
//! [`StreamCoordinator`](crate::StreamCoordinator).

pub mod frame;
mod local;
mod peer;
mod push;
mod socket;
mod traits;

pub use frame::{decode_frame, decode_sse_event, SseEvent, SseParser, WireFrame, MAX_FRAME_SIZE};
pub use local::LocalFallback;
pub use peer::{PeerConnector, PeerDataChannel, PeerLink, SessionDescription};
pub use push::PushChannel;
pub use socket::SocketChannel;
pub use traits::{ChunkFeed, FeedEvent, FeedSender, TransportContext, TransportStrategy};

#[cfg(test)]
pub(crate) fn test_context() -> TransportContext {
    use std::sync::Arc;

    use crate::builder::{build_fallback_snapshot, FallbackSnapshotOptions};
    use crate::request::StreamRequest;

    TransportContext {
        request: Arc::new(StreamRequest::new("What is ownership?", "conv-test", "msg-test")),
        resolver: crate::kernel::fallback_resolver(|| async {
            Ok(build_fallback_snapshot(
                "Ownership ties every value to one owner.",
                &FallbackSnapshotOptions::default(),
            ))
        }),
        cancel: tokio_util::sync::CancellationToken::new(),
        peer_connector: None,
    }
}
