//! Stream Coordinator - Transport Negotiation
//!
//! [`StreamCoordinator::start_stream`] returns a live [`StreamSession`] at
//! once and negotiates in the background:
//!
//! - Strategies are tried in preference order. A strategy that lacks its
//!   endpoint or platform capability is skipped; any other failure is
//!   recorded and the next strategy is tried.
//! - The first strategy that establishes a feed wins. Its transport tag is
//!   fixed on the session and its events are pumped into the session until
//!   a terminal state.
//! - [`LocalFallback`] is always last. If it fails too (the fallback
//!   resolver rejected), the error callback receives the last error and the
//!   session is completed anyway, so `completion()` resolves.
//!
//! An `error` frame from a live transport after establishment is different:
//! the error callback fires and the session fails.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ReplayCache};
use crate::chunk::TransportKind;
use crate::config::EngineConfig;
use crate::error::StreamError;
use crate::fallback::SynthOptions;
use crate::request::{ErrorCallback, RequestHooks, StreamRequest};
use crate::session::{SessionConfig, StreamSession};
use crate::transport::{
    ChunkFeed, FeedEvent, LocalFallback, PeerConnector, PeerDataChannel, PushChannel,
    SocketChannel, TransportContext, TransportStrategy,
};

/// Negotiates transports and hands out stream sessions
#[derive(Clone)]
pub struct StreamCoordinator {
    strategies: Vec<Arc<dyn TransportStrategy>>,
    cache: ReplayCache,
    session_config: SessionConfig,
    peer_connector: Option<Arc<dyn PeerConnector>>,
}

impl StreamCoordinator {
    /// Coordinator over `strategies`, tried in order
    ///
    /// The local fallback is moved to the end of the list, or appended with
    /// default pacing when missing. Caching is disabled until
    /// [`with_cache`](Self::with_cache).
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn TransportStrategy>>) -> Self {
        let (mut ordered, local): (Vec<_>, Vec<_>) = strategies
            .into_iter()
            .partition(|s| s.kind() != TransportKind::LocalFallback);
        let fallback: Arc<dyn TransportStrategy> = match local.into_iter().next() {
            Some(local) => local,
            None => Arc::new(LocalFallback::default()),
        };
        ordered.push(fallback);

        Self {
            strategies: ordered,
            cache: ReplayCache::disabled(),
            session_config: SessionConfig::default(),
            peer_connector: None,
        }
    }

    /// Build strategies, pacing and cache from configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let transports = &config.transports;
        let synth = SynthOptions {
            chunk_delay: config.pacing.chunk_delay,
            tokens_per_chunk: config.pacing.tokens_per_chunk,
        };

        let strategies = transports
            .preference
            .iter()
            .map(|kind| -> Arc<dyn TransportStrategy> {
                match kind {
                    TransportKind::PushChannel => Arc::new(PushChannel::new(
                        transports.push_endpoint.clone(),
                        transports.connect_timeout,
                    )),
                    TransportKind::SocketChannel => Arc::new(SocketChannel::new(
                        transports.socket_endpoint.clone(),
                        transports.connect_timeout,
                    )),
                    TransportKind::PeerDataChannel => Arc::new(PeerDataChannel::new(
                        transports.peer_signaling_endpoint.clone(),
                        transports.connect_timeout,
                    )),
                    TransportKind::LocalFallback => Arc::new(LocalFallback::new(synth.clone())),
                }
            })
            .collect();

        let cache = match (config.cache.enabled, &config.cache.directory) {
            (false, _) => ReplayCache::disabled(),
            (true, Some(dir)) => ReplayCache::file(dir.clone()),
            (true, None) => ReplayCache::memory(),
        };

        Self::new(strategies)
            .with_cache(cache)
            .with_session_config(SessionConfig {
                adaptive_window: config.pacing.adaptive_window,
            })
    }

    /// Persist completed sessions to `cache`
    #[must_use]
    pub fn with_cache(mut self, cache: ReplayCache) -> Self {
        self.cache = cache;
        self
    }

    /// Provide platform peer-connection support
    #[must_use]
    pub fn with_peer_connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer_connector = Some(connector);
        self
    }

    /// Tune created sessions
    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Strategy order used for negotiation
    #[must_use]
    pub fn strategies(&self) -> Vec<TransportKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// The replay cache sessions persist into
    #[must_use]
    pub fn cache(&self) -> &ReplayCache {
        &self.cache
    }

    /// Start answering `request`
    ///
    /// Returns immediately; negotiation runs on a background task. Must be
    /// called inside a Tokio runtime.
    pub fn start_stream(&self, request: StreamRequest, hooks: RequestHooks) -> StreamSession {
        let cancel = CancellationToken::new();
        let session = if self.cache.is_enabled() {
            StreamSession::with_replay(
                self.session_config.clone(),
                cancel.clone(),
                self.cache.clone(),
                CacheKey::new(&request.conversation_id, &request.message_id),
            )
        } else {
            StreamSession::new(self.session_config.clone(), cancel.clone())
        };

        debug!(
            conversation_id = %request.conversation_id,
            message_id = %request.message_id,
            strategies = ?self.strategies(),
            "Starting stream negotiation"
        );

        let ctx = TransportContext {
            request: Arc::new(request),
            resolver: hooks.fallback_resolver,
            cancel,
            peer_connector: self.peer_connector.clone(),
        };
        tokio::spawn(negotiate(
            self.strategies.clone(),
            ctx,
            hooks.on_error,
            session.clone(),
        ));
        session
    }
}

impl std::fmt::Debug for StreamCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinator")
            .field("strategies", &self.strategies())
            .field("cache", &self.cache)
            .field("peer_connector", &self.peer_connector.is_some())
            .finish_non_exhaustive()
    }
}

async fn negotiate(
    strategies: Vec<Arc<dyn TransportStrategy>>,
    ctx: TransportContext,
    on_error: Option<ErrorCallback>,
    session: StreamSession,
) {
    let mut last_error: Option<StreamError> = None;

    for strategy in &strategies {
        let kind = strategy.kind();
        let attempt = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                debug!(transport = %kind, "Negotiation cancelled");
                return;
            }
            attempt = strategy.establish(&ctx) => attempt,
        };

        match attempt {
            Ok(feed) => {
                info!(
                    transport = %kind,
                    conversation_id = %ctx.request.conversation_id,
                    message_id = %ctx.request.message_id,
                    "Transport established"
                );
                session.bind_transport(kind);
                pump(&session, feed, kind, on_error.as_ref(), &ctx.cancel).await;
                return;
            }
            Err(e) if e.is_precondition() => {
                debug!(transport = %kind, reason = %e, "Skipping transport");
            }
            Err(e) => {
                debug!(transport = %kind, error = %e, "Transport attempt failed");
                last_error = Some(e.into_stream_error(kind));
            }
        }
    }

    let failure = last_error.unwrap_or(StreamError::NoTransport);
    match &on_error {
        Some(callback) => {
            warn!(error = %failure, "All transports failed, completing empty session");
            callback(&failure);
        }
        None => {
            error!(error = %failure, "All transports failed and no error callback was supplied");
        }
    }
    session.complete().await;
}

async fn pump(
    session: &StreamSession,
    feed: ChunkFeed,
    kind: TransportKind,
    on_error: Option<&ErrorCallback>,
    cancel: &CancellationToken,
) {
    let ChunkFeed { mut events, teardown } = feed;
    if let Some(teardown) = teardown {
        session.register_teardown(teardown);
    }

    while !session.is_terminal() {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(FeedEvent::Chunk(chunk)) => session.handle_chunk(chunk).await,
            Some(FeedEvent::Failed(failure)) => {
                warn!(transport = %kind, error = %failure, "Live stream failed");
                if let Some(callback) = on_error {
                    callback(&failure);
                }
                session.fail(failure);
                break;
            }
            None => {
                if !session.awaiting_finalize() {
                    warn!(transport = %kind, "Feed closed without a terminal chunk, finalizing");
                }
                session.finish_when_drained().await;
                break;
            }
        }
    }
}
