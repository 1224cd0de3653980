//! Stream Sessions
//!
//! The chunk-accumulation state machine and the primitives it is built on:
//!
//! - [`StreamSession`]: owns the evolving snapshot of one answer
//! - [`ListenerSet`]: per-modality and lifecycle callbacks
//! - [`TimerSet`]: tracked, cancellable delayed tasks
//! - [`AdaptivePacer`]: reading-speed delays for text delivery

mod lifecycle;
mod listeners;
mod pacing;
mod stream_session;
mod timers;

use std::sync::Arc;

use crate::chunk::StreamChunk;
use crate::error::StreamError;
use crate::snapshot::StreamSnapshot;

pub(crate) use lifecycle::Settlement;
pub use lifecycle::SessionState;
pub use listeners::{ListenerId, ListenerSet};
pub use pacing::AdaptivePacer;
pub use stream_session::{SessionConfig, StreamSession, DEFAULT_ADAPTIVE_WINDOW};
pub use timers::TimerSet;

/// Releases transport resources; runs exactly once
pub type Teardown = Box<dyn FnOnce() + Send>;

/// A chunk together with the snapshot it produced
#[derive(Clone, Debug)]
pub struct ChunkUpdate {
    /// The chunk as delivered by the transport
    pub chunk: StreamChunk,
    /// Session snapshot right after the chunk was merged
    pub snapshot: Arc<StreamSnapshot>,
}

/// Everything a session reports, as one stream of events
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A paced text chunk was delivered
    Text(ChunkUpdate),
    /// An audio chunk arrived
    Audio(ChunkUpdate),
    /// A visual chunk arrived
    Visual(ChunkUpdate),
    /// The session completed with its final snapshot
    Completed(Arc<StreamSnapshot>),
    /// The session was cancelled
    Cancelled,
    /// The session failed
    Failed(StreamError),
}

impl SessionEvent {
    /// Whether this is the last event of the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Cancelled | Self::Failed(_))
    }
}
