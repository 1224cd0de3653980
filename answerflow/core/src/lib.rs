//! Answerflow Core - Streaming Response Session Engine
//!
//! Turns one "ask the assistant" request into an incrementally delivered,
//! multi-modal answer (text, subtitles, highlights, optional audio, optional
//! avatar state). Live transports are negotiated in preference order; when
//! none is available the answer is produced locally and played back so it
//! looks like a live stream to every consumer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Caller / CLI                             │
//! │        StreamRequest + RequestHooks (fallback resolver)          │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ start_stream
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                      StreamCoordinator                            │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌───────────────────┐ │
//! │  │   Push   │→ │  Socket  │→ │   Peer   │→ │  Local Fallback   │ │
//! │  │  (SSE)   │  │   (WS)   │  │  (data)  │  │ resolver + synth  │ │
//! │  └──────────┘  └──────────┘  └──────────┘  └───────────────────┘ │
//! │                         ChunkFeed                                 │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ handle_chunk
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                        StreamSession                              │
//! │   snapshot · adaptive pacing · listeners · timers · completion   │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ on completion
//!                          ┌──────┴───────┐
//!                          │ ReplayCache  │
//!                          └──────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamCoordinator`]: negotiates transports and hands out sessions
//! - [`StreamSession`]: accumulates chunks into a [`StreamSnapshot`]
//! - [`StreamChunk`]: one incremental unit of output
//! - [`ReplayCache`]: finished snapshots keyed by conversation and message
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use answerflow_core::{
//!     create_fallback_resolver, FallbackSnapshotOptions, RequestHooks, StaticKernel,
//!     StreamCoordinator, StreamRequest,
//! };
//!
//! let coordinator = StreamCoordinator::from_config(&answerflow_core::load_config()?);
//! let request = StreamRequest::new("What is ownership?", "conv-1", "msg-1");
//! let resolver = create_fallback_resolver(
//!     Arc::new(StaticKernel::new("Every value has one owner.")),
//!     &request,
//!     FallbackSnapshotOptions::default(),
//! );
//!
//! let session = coordinator.start_stream(request, RequestHooks::new(resolver));
//! session.on_text(|update| print!("{}", update.snapshot.text));
//! let snapshot = session.completion().await?;
//! ```
//!
//! # Module Overview
//!
//! - [`chunk`]: chunk data model and transport kinds
//! - [`snapshot`]: the cumulative observable state
//! - [`tokenizer`]: splits text into emission units
//! - [`builder`]: highlights, subtitle merging, fallback snapshots
//! - [`session`]: the stream session state machine and its primitives
//! - [`fallback`]: paced playback of a fully known answer
//! - [`transport`]: transport strategies and wire frames
//! - [`coordinator`]: transport negotiation
//! - [`cache`]: replay cache and stores
//! - [`kernel`]: the answer-generation boundary
//! - [`config`]: TOML and environment configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod kernel;
pub mod request;
pub mod session;
pub mod snapshot;
pub mod tokenizer;
pub mod transport;

// Re-exports for convenience
pub use builder::{
    build_fallback_snapshot, compute_highlights, merge_subtitle_cues, FallbackSnapshotOptions,
};
pub use cache::{CacheKey, FileStore, MemoryStore, ReplayCache, ReplayStore};
pub use chunk::{
    AudioChunk, AvatarDescriptor, ChunkPayload, EmojiCue, Modality, StreamChunk, SubtitleCue,
    TextChunk, TransportKind, VisualChunk,
};
pub use coordinator::StreamCoordinator;
pub use error::{CacheError, FrameError, StreamError, TransportError};
pub use fallback::{synthesize, SynthControls, SynthOptions, SynthStream};
pub use kernel::{create_fallback_resolver, fallback_resolver, HttpKernel, Kernel, StaticKernel};
pub use request::{
    new_message_id, AttachmentRef, ErrorCallback, FallbackResolver, RequestHooks, Snippet,
    StreamRequest,
};
pub use session::{
    ChunkUpdate, ListenerId, SessionConfig, SessionEvent, SessionState, StreamSession,
};
pub use snapshot::{AudioTrack, StreamSnapshot};
pub use tokenizer::token_chunks;
pub use transport::{PeerConnector, PeerLink, SessionDescription, TransportStrategy};

// Config exports
pub use config::{
    default_cache_dir, default_config_path, load_config, load_config_from_path, ConfigError,
    ConfigOverrides, ConfigSource, EngineConfig, EngineToml,
};
