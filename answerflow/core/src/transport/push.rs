//! Push Channel
//!
//! POSTs the request as JSON and reads the answer as server-sent events from
//! the response body.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use super::frame::{decode_sse_event, SseEvent, SseParser};
use super::traits::{ChunkFeed, FeedSender, TransportContext, TransportStrategy};
use crate::chunk::TransportKind;
use crate::error::{StreamError, TransportError};

/// Longest error body kept in a status error
const MAX_ERROR_BODY: usize = 512;

/// Server-sent events over HTTP
#[derive(Debug, Clone)]
pub struct PushChannel {
    endpoint: Option<String>,
    connect_timeout: Duration,
    http_client: reqwest::Client,
}

impl PushChannel {
    /// Create a push channel; without an endpoint it is unavailable
    #[must_use]
    pub fn new(endpoint: Option<String>, connect_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            connect_timeout,
            http_client,
        }
    }
}

/// Read a non-success response body for an error message
pub(crate) async fn status_error(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    TransportError::Status { status, body }
}

fn forward(sender: &FeedSender, event: &SseEvent) -> bool {
    match decode_sse_event(event) {
        Ok(Some(frame)) => sender.frame(frame),
        Ok(None) => true,
        Err(e) => {
            warn!(transport = %TransportKind::PushChannel, error = %e, "Dropping malformed frame");
            true
        }
    }
}

#[async_trait]
impl TransportStrategy for PushChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::PushChannel
    }

    async fn establish(&self, ctx: &TransportContext) -> Result<ChunkFeed, TransportError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(TransportError::Unavailable("no push endpoint configured".into()));
        };

        let request = self
            .http_client
            .post(endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(ctx.request.as_ref())
            .send();
        let response = tokio::time::timeout(self.connect_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let (sender, events) = ChunkFeed::channel(TransportKind::PushChannel);
        let mut body = response.bytes_stream();
        let reader = tokio::spawn(async move {
            let mut parser = SseParser::new();
            while let Some(next) = body.next().await {
                match next {
                    Ok(bytes) => match parser.push(&bytes) {
                        Ok(parsed) => {
                            for event in &parsed {
                                if !forward(&sender, event) {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(transport = %TransportKind::PushChannel, error = %e, "Dropping oversized event");
                        }
                    },
                    Err(e) => {
                        sender.fail(StreamError::Transport {
                            transport: TransportKind::PushChannel,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
            if let Some(event) = parser.finish() {
                forward(&sender, &event);
            }
            debug!("Push channel body ended");
        });

        Ok(ChunkFeed::new(events).with_teardown(move || reader.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_endpoint_is_precondition_failure() {
        let channel = PushChannel::new(None, Duration::from_millis(100));
        let ctx = crate::transport::test_context();
        let err = channel.establish(&ctx).await.unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        // port 9 (discard) on loopback is essentially never listening
        let channel = PushChannel::new(
            Some("http://127.0.0.1:9/stream".into()),
            Duration::from_millis(500),
        );
        let ctx = crate::transport::test_context();
        let err = channel.establish(&ctx).await.unwrap_err();
        assert!(!err.is_precondition());
    }
}
