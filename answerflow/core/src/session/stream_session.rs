//! Stream Session
//!
//! Accumulates chunks from the winning transport into an evolving snapshot.
//!
//! # Routing
//!
//! - **Text** is merged into the snapshot on arrival, then delivered to text
//!   listeners after an adaptive delay (see [`AdaptivePacer`]). A chunk with
//!   `done` finalizes the session once its own delivery has fired.
//! - **Audio** is appended and delivered immediately; `isFinal` finalizes
//!   once every queued text delivery has fired.
//! - **Visual** replaces the avatar state and is delivered immediately.
//!
//! # Termination
//!
//! Exactly one of [`complete`](StreamSession::complete),
//! [`cancel`](StreamSession::cancel) (or the shared cancellation token) and
//! [`fail`](StreamSession::fail) takes effect; later calls and later chunks
//! are no-ops. Every terminal path closes the timers, runs teardowns once,
//! notifies its listeners and then releases all listener sets. Only
//! completion writes to the replay cache.
//!
//! Listener delivery and terminal transitions are serialised by a re-entrant
//! dispatch gate: once a terminal transition has returned, no further chunk
//! listener runs, while a listener may still cancel its own session.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AdaptivePacer, ChunkUpdate, ListenerId, ListenerSet, SessionEvent, SessionState, Settlement,
    Teardown, TimerSet,
};
use crate::builder::{compute_highlights, merge_subtitle_cues};
use crate::cache::{CacheKey, ReplayCache};
use crate::chunk::{ChunkPayload, Modality, StreamChunk, TransportKind};
use crate::error::StreamError;
use crate::snapshot::{AudioTrack, StreamSnapshot};

/// Default adaptive pacing window
pub const DEFAULT_ADAPTIVE_WINDOW: Duration = Duration::from_millis(120);

/// Session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base delay for text delivery at playback rate 1.0
    pub adaptive_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            adaptive_window: DEFAULT_ADAPTIVE_WINDOW,
        }
    }
}

struct SessionCore {
    state: SessionState,
    snapshot: Arc<StreamSnapshot>,
    transport: Option<TransportKind>,
    pacer: AdaptivePacer,
    pending_text: VecDeque<ChunkUpdate>,
    finalize_requested: bool,
    error: Option<StreamError>,
}

#[derive(Default)]
struct SessionListeners {
    text: ListenerSet<ChunkUpdate>,
    audio: ListenerSet<ChunkUpdate>,
    visual: ListenerSet<ChunkUpdate>,
    complete: ListenerSet<Arc<StreamSnapshot>>,
    cancel: ListenerSet<()>,
    error: ListenerSet<StreamError>,
}

impl SessionListeners {
    fn clear(&self) {
        self.text.clear();
        self.audio.clear();
        self.visual.clear();
        self.complete.clear();
        self.cancel.clear();
        self.error.clear();
    }

    fn remove(&self, id: ListenerId) -> bool {
        self.text.unsubscribe(id)
            || self.audio.unsubscribe(id)
            || self.visual.unsubscribe(id)
            || self.complete.unsubscribe(id)
            || self.cancel.unsubscribe(id)
            || self.error.unsubscribe(id)
    }
}

struct SessionInner {
    core: Mutex<SessionCore>,
    gate: ReentrantMutex<()>,
    listeners: SessionListeners,
    timers: TimerSet,
    cancel: CancellationToken,
    /// `None` once teardowns have run
    teardowns: Mutex<Option<Vec<Teardown>>>,
    replay: Option<(ReplayCache, CacheKey)>,
    settlement: Settlement<Arc<StreamSnapshot>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(teardowns) = self.teardowns.get_mut().take() {
            for teardown in teardowns {
                teardown();
            }
        }
    }
}

/// Handle to one streaming answer
///
/// Cheap to clone; all clones refer to the same session. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

impl StreamSession {
    /// Create a session driven by `cancel`
    #[must_use]
    pub fn new(config: SessionConfig, cancel: CancellationToken) -> Self {
        Self::build(config, cancel, None)
    }

    /// Create a session that persists its final snapshot under `key`
    #[must_use]
    pub fn with_replay(
        config: SessionConfig,
        cancel: CancellationToken,
        cache: ReplayCache,
        key: CacheKey,
    ) -> Self {
        Self::build(config, cancel, Some((cache, key)))
    }

    fn build(
        config: SessionConfig,
        cancel: CancellationToken,
        replay: Option<(ReplayCache, CacheKey)>,
    ) -> Self {
        let core = SessionCore {
            state: SessionState::Open,
            snapshot: Arc::new(StreamSnapshot::empty(TransportKind::LocalFallback)),
            transport: None,
            pacer: AdaptivePacer::new(config.adaptive_window),
            pending_text: VecDeque::new(),
            finalize_requested: false,
            error: None,
        };
        let inner = Arc::new(SessionInner {
            core: Mutex::new(core),
            gate: ReentrantMutex::new(()),
            listeners: SessionListeners::default(),
            timers: TimerSet::new(cancel.clone()),
            cancel,
            teardowns: Mutex::new(Some(Vec::new())),
            replay,
            settlement: Settlement::new(),
        });
        let session = Self { inner };
        session.watch_cancellation();
        session
    }

    fn watch_cancellation(&self) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let token = self.inner.cancel.clone();
        let settled = self.inner.settlement.wait();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    if let Some(inner) = weak.upgrade() {
                        StreamSession { inner }.finish_cancelled();
                    }
                }
                _ = settled => {}
            }
        });
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// Whether the session reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Latest snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<StreamSnapshot> {
        Arc::clone(&self.inner.core.lock().snapshot)
    }

    /// Transport bound to this session, once known
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.inner.core.lock().transport
    }

    /// Error that failed the session, if any
    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.inner.core.lock().error.clone()
    }

    /// Current adaptive playback rate
    #[must_use]
    pub fn playback_rate(&self) -> f64 {
        self.inner.core.lock().pacer.rate()
    }

    /// Number of text deliveries still scheduled
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }

    /// The token that cancels this session
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Future resolving when the session reaches a terminal state
    ///
    /// `Ok` with the final snapshot on completion, `Err(Cancelled)` on
    /// cancellation, the failing error otherwise.
    pub fn completion(
        &self,
    ) -> impl Future<Output = Result<Arc<StreamSnapshot>, StreamError>> + Send + 'static {
        self.inner.settlement.wait()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Called for each paced text delivery
    pub fn on_text<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChunkUpdate) + Send + Sync + 'static,
    {
        self.inner.listeners.text.subscribe(listener)
    }

    /// Called for each audio chunk
    pub fn on_audio<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChunkUpdate) + Send + Sync + 'static,
    {
        self.inner.listeners.audio.subscribe(listener)
    }

    /// Called for each visual chunk
    pub fn on_visual<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChunkUpdate) + Send + Sync + 'static,
    {
        self.inner.listeners.visual.subscribe(listener)
    }

    /// Called once with the final snapshot
    pub fn on_complete<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Arc<StreamSnapshot>) + Send + Sync + 'static,
    {
        self.inner.listeners.complete.subscribe(listener)
    }

    /// Called once on cancellation
    pub fn on_cancel<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.listeners.cancel.subscribe(listener)
    }

    /// Called once on failure
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.inner.listeners.error.subscribe(listener)
    }

    /// Remove any listener registered on this session
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// All session events as a stream; ends after the terminal event
    pub fn updates(&self) -> UnboundedReceiverStream<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _gate = self.inner.gate.lock();

        let terminal = {
            let core = self.inner.core.lock();
            match core.state {
                SessionState::Open => None,
                SessionState::Completed => Some(SessionEvent::Completed(Arc::clone(&core.snapshot))),
                SessionState::Cancelled => Some(SessionEvent::Cancelled),
                SessionState::Errored => Some(SessionEvent::Failed(
                    core.error.clone().unwrap_or(StreamError::Abandoned),
                )),
            }
        };
        if let Some(event) = terminal {
            let _ = tx.send(event);
            return UnboundedReceiverStream::new(rx);
        }

        let listeners = &self.inner.listeners;
        let sender = tx.clone();
        listeners.text.subscribe(move |u| {
            let _ = sender.send(SessionEvent::Text(u.clone()));
        });
        let sender = tx.clone();
        listeners.audio.subscribe(move |u| {
            let _ = sender.send(SessionEvent::Audio(u.clone()));
        });
        let sender = tx.clone();
        listeners.visual.subscribe(move |u| {
            let _ = sender.send(SessionEvent::Visual(u.clone()));
        });
        let sender = tx.clone();
        listeners.complete.subscribe(move |s| {
            let _ = sender.send(SessionEvent::Completed(Arc::clone(s)));
        });
        let sender = tx.clone();
        listeners.cancel.subscribe(move |()| {
            let _ = sender.send(SessionEvent::Cancelled);
        });
        listeners.error.subscribe(move |e| {
            let _ = tx.send(SessionEvent::Failed(e.clone()));
        });

        UnboundedReceiverStream::new(rx)
    }

    /// Run `teardown` when the session terminates (immediately if it already has)
    pub fn register_teardown<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.inner.teardowns.lock();
        if let Some(pending) = slot.as_mut() {
            pending.push(Box::new(teardown));
            return;
        }
        drop(slot);
        teardown();
    }

    // ========================================================================
    // Chunk Routing
    // ========================================================================

    /// Fix the transport tag for the rest of the session
    pub(crate) fn bind_transport(&self, kind: TransportKind) {
        let mut core = self.inner.core.lock();
        if core.state.is_terminal() {
            return;
        }
        core.transport = Some(kind);
        if core.snapshot.transport != kind {
            let mut next = core.snapshot.successor();
            next.transport = kind;
            core.snapshot = Arc::new(next);
        }
    }

    /// Merge a chunk into the session
    ///
    /// A final audio chunk finalizes the session once every queued text
    /// delivery has fired.
    pub async fn handle_chunk(&self, chunk: StreamChunk) {
        let terminal = chunk.payload.is_terminal();
        match chunk.modality() {
            Modality::Text => self.accept_text(chunk),
            Modality::Audio => {
                if self.accept_audio(chunk) && terminal {
                    self.finish_when_drained().await;
                }
            }
            Modality::Visual => self.accept_visual(chunk),
        }
    }

    fn accept_text(&self, chunk: StreamChunk) {
        let ChunkPayload::Text(text) = &chunk.payload else {
            return;
        };

        let delay = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                debug!(state = %core.state, "Dropping text chunk after terminal state");
                return;
            }

            let transport = *core.transport.get_or_insert(chunk.transport);
            let mut next = core.snapshot.successor();
            next.transport = transport;
            next.text.push_str(&text.text);
            next.highlight_keywords = match &text.highlight_keywords {
                Some(keywords) => keywords.clone(),
                None => compute_highlights(&next.text),
            };
            if let Some(cues) = &text.subtitles {
                next.subtitles = merge_subtitle_cues(&next.subtitles, cues);
            }
            if let Some(cues) = &text.emoji_cues {
                next.emoji_cues.extend(cues.iter().cloned());
            }
            if text.done {
                core.finalize_requested = true;
            }

            let delay = core.pacer.schedule(text.text.chars().count());
            let snapshot = Arc::new(next);
            core.snapshot = Arc::clone(&snapshot);
            core.pending_text.push_back(ChunkUpdate { chunk, snapshot });
            delay
        };

        let session = self.clone();
        self.inner.timers.schedule(delay, async move {
            session.deliver_next_text().await;
        });
    }

    async fn deliver_next_text(&self) {
        let finalize = {
            let _gate = self.inner.gate.lock();
            let (update, finalize) = {
                let mut core = self.inner.core.lock();
                if core.state.is_terminal() {
                    return;
                }
                let Some(update) = core.pending_text.pop_front() else {
                    return;
                };
                let finalize = core.pending_text.is_empty() && core.finalize_requested;
                (update, finalize)
            };
            self.inner.listeners.text.notify(&update);
            finalize
        };

        if finalize {
            self.complete().await;
        }
    }

    fn accept_audio(&self, chunk: StreamChunk) -> bool {
        let ChunkPayload::Audio(audio) = &chunk.payload else {
            return false;
        };

        let _gate = self.inner.gate.lock();
        let snapshot = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                debug!(state = %core.state, "Dropping audio chunk after terminal state");
                return false;
            }

            let transport = *core.transport.get_or_insert(chunk.transport);
            let mut next = core.snapshot.successor();
            next.transport = transport;
            let track = next.audio.get_or_insert_with(AudioTrack::default);
            if !audio.mime_type.is_empty() {
                track.mime_type.clone_from(&audio.mime_type);
            }
            if !audio.bytes.is_empty() {
                track.segments.push(Arc::from(audio.bytes.as_slice()));
            }
            if let Some(spectrum) = &audio.spectrum {
                track.spectrum.clone_from(spectrum);
            }
            if let Some(waveform) = &audio.waveform {
                track.waveform.clone_from(waveform);
            }

            let snapshot = Arc::new(next);
            core.snapshot = Arc::clone(&snapshot);
            snapshot
        };

        self.inner
            .listeners
            .audio
            .notify(&ChunkUpdate { chunk, snapshot });
        true
    }

    fn accept_visual(&self, chunk: StreamChunk) {
        let ChunkPayload::Visual(visual) = &chunk.payload else {
            return;
        };

        let _gate = self.inner.gate.lock();
        let snapshot = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return;
            }
            let transport = *core.transport.get_or_insert(chunk.transport);
            let mut next = core.snapshot.successor();
            next.transport = transport;
            next.avatar_descriptor = Some(visual.avatar_descriptor.clone());

            let snapshot = Arc::new(next);
            core.snapshot = Arc::clone(&snapshot);
            snapshot
        };

        self.inner
            .listeners
            .visual
            .notify(&ChunkUpdate { chunk, snapshot });
    }

    /// Whether a finalization is waiting for pending text deliveries
    pub(crate) fn awaiting_finalize(&self) -> bool {
        self.inner.core.lock().finalize_requested
    }

    /// Complete once every scheduled text delivery has fired
    pub(crate) async fn finish_when_drained(&self) {
        let drained = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return;
            }
            core.finalize_requested = true;
            core.pending_text.is_empty()
        };
        if drained {
            self.complete().await;
        }
    }

    // ========================================================================
    // Terminal Transitions
    // ========================================================================

    fn transition(&self, target: SessionState, error: Option<StreamError>) -> bool {
        let mut core = self.inner.core.lock();
        if core.state.is_terminal() {
            debug!(state = %core.state, requested = %target, "Ignoring second terminal transition");
            return false;
        }
        core.state = target;
        core.pending_text.clear();
        core.finalize_requested = false;
        core.error = error;
        true
    }

    fn run_teardowns(&self) {
        let teardowns = self.inner.teardowns.lock().take();
        for teardown in teardowns.into_iter().flatten() {
            teardown();
        }
    }

    /// Freeze the snapshot, persist it and notify completion listeners
    ///
    /// Idempotent; a no-op after any terminal transition.
    pub async fn complete(&self) {
        let snapshot = {
            let _gate = self.inner.gate.lock();
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return;
            }
            core.state = SessionState::Completed;
            core.pending_text.clear();
            core.finalize_requested = false;

            let mut frozen = core.snapshot.successor();
            if !frozen.text.is_empty() {
                frozen.highlight_keywords = compute_highlights(&frozen.text);
            }
            let frozen = Arc::new(frozen);
            core.snapshot = Arc::clone(&frozen);
            frozen
        };

        self.inner.timers.close();
        self.run_teardowns();

        if let Some((cache, key)) = &self.inner.replay {
            cache.persist(key, &snapshot).await;
        }

        {
            let _gate = self.inner.gate.lock();
            self.inner.listeners.complete.notify(&snapshot);
        }
        self.inner.listeners.clear();
        self.inner.settlement.settle(Ok(Arc::clone(&snapshot)));

        info!(
            transport = %snapshot.transport,
            chars = snapshot.text.chars().count(),
            "Stream session completed"
        );
    }

    /// Cancel the session and the shared cancellation token
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        self.finish_cancelled();
    }

    fn finish_cancelled(&self) {
        let _gate = self.inner.gate.lock();
        if !self.transition(SessionState::Cancelled, None) {
            return;
        }
        self.inner.timers.close();
        self.run_teardowns();
        self.inner.listeners.cancel.notify(&());
        self.inner.listeners.clear();
        self.inner.settlement.settle(Err(StreamError::Cancelled));
        info!("Stream session cancelled");
    }

    /// Fail the session; the completion future rejects with `error`
    pub fn fail(&self, error: StreamError) {
        let _gate = self.inner.gate.lock();
        if !self.transition(SessionState::Errored, Some(error.clone())) {
            return;
        }
        self.inner.timers.close();
        self.run_teardowns();
        self.inner.listeners.error.notify(&error);
        self.inner.listeners.clear();
        warn!(error = %error, "Stream session failed");
        self.inner.settlement.settle(Err(error));
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("StreamSession")
            .field("state", &core.state)
            .field("transport", &core.transport)
            .field("chars", &core.snapshot.text.len())
            .field("pending_text", &core.pending_text.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{AudioChunk, AvatarDescriptor, EmojiCue, SubtitleCue, TextChunk};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    const T: TransportKind = TransportKind::PushChannel;

    fn session() -> StreamSession {
        StreamSession::new(SessionConfig::default(), CancellationToken::new())
    }

    fn text(s: &str) -> StreamChunk {
        StreamChunk::text(T, s)
    }

    fn done(s: &str) -> StreamChunk {
        StreamChunk::new(T, ChunkPayload::Text(TextChunk::new(s).finished()))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let reader = Arc::clone(&count);
        (count, move || reader.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_concatenates_in_arrival_order() {
        let session = session();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        session.on_text(move |update| {
            if let ChunkPayload::Text(t) = &update.chunk.payload {
                sink.lock().push(t.text.clone());
            }
        });

        let parts = ["A long opening sentence that paces slowly, ", "then ", "short", "."];
        for part in &parts[..3] {
            session.handle_chunk(text(part)).await;
        }
        session.handle_chunk(done(parts[3])).await;

        // merged on arrival, delivered later
        assert_eq!(session.snapshot().text, parts.concat());
        assert!(delivered.lock().is_empty());

        let snapshot = session.completion().await.unwrap();
        assert_eq!(snapshot.text, parts.concat());
        assert_eq!(*delivered.lock(), parts.to_vec());
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_completes_after_its_delivery() {
        let session = session();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        session.on_text(move |_| log.lock().push("text"));
        let log = Arc::clone(&order);
        session.on_complete(move |_| log.lock().push("complete"));

        session.handle_chunk(done("Finished answer.")).await;
        assert_eq!(session.state(), SessionState::Open);

        session.completion().await.unwrap();
        assert_eq!(*order.lock(), vec!["text", "complete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_notifies_synchronously_and_final_completes() {
        let session = session();
        let (count, audio_calls) = counter();
        session.on_audio(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let first = AudioChunk {
            mime_type: "audio/wav".into(),
            bytes: vec![1, 2],
            spectrum: Some(vec![0.1]),
            ..Default::default()
        };
        session.handle_chunk(StreamChunk::audio(T, first)).await;
        assert_eq!(audio_calls(), 1);
        assert_eq!(session.state(), SessionState::Open);

        let last = AudioChunk {
            mime_type: "audio/wav".into(),
            bytes: vec![3],
            waveform: Some(vec![0.5]),
            is_final: true,
            ..Default::default()
        };
        session.handle_chunk(StreamChunk::audio(T, last)).await;
        assert_eq!(audio_calls(), 2);
        assert_eq!(session.state(), SessionState::Completed);

        let snapshot = session.completion().await.unwrap();
        let audio = snapshot.audio.as_ref().unwrap();
        assert_eq!(audio.buffer(), vec![1, 2, 3]);
        assert_eq!(audio.spectrum, vec![0.1]);
        assert_eq!(audio.waveform, vec![0.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_audio_waits_for_queued_text() {
        let session = session();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        session.on_text(move |update| {
            if let ChunkPayload::Text(t) = &update.chunk.payload {
                log.lock().push(t.text.clone());
            }
        });
        let log = Arc::clone(&order);
        session.on_complete(move |_| log.lock().push("complete".to_string()));

        session.handle_chunk(text("Hello there, ")).await;
        session.handle_chunk(text("world.")).await;
        let last = AudioChunk {
            mime_type: "audio/wav".into(),
            bytes: vec![7],
            is_final: true,
            ..Default::default()
        };
        session.handle_chunk(StreamChunk::audio(T, last)).await;
        assert_eq!(session.state(), SessionState::Open);

        let snapshot = session.completion().await.unwrap();
        assert_eq!(snapshot.text, "Hello there, world.");
        assert_eq!(snapshot.audio.as_ref().unwrap().buffer(), vec![7]);
        assert_eq!(
            *order.lock(),
            vec!["Hello there, ", "world.", "complete"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_emoji_cues_append_and_delivery_waits_for_window() {
        let window = Duration::from_millis(120);
        let session = StreamSession::new(
            SessionConfig {
                adaptive_window: window,
            },
            CancellationToken::new(),
        );
        let (count, deliveries) = counter();
        session.on_text(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let cue = |time: f64, emoji: &str| EmojiCue {
            time,
            emoji: emoji.to_string(),
        };
        let first = TextChunk {
            emoji_cues: Some(vec![cue(0.5, "👋")]),
            ..TextChunk::new("Hello there, ")
        };
        session
            .handle_chunk(StreamChunk::new(T, ChunkPayload::Text(first)))
            .await;
        let first_delay = window.div_f64(session.playback_rate());

        let second = TextChunk {
            emoji_cues: Some(vec![cue(1.0, "🦀"), cue(1.5, "✨")]),
            ..TextChunk::new("world.").finished()
        };
        session
            .handle_chunk(StreamChunk::new(T, ChunkPayload::Text(second)))
            .await;

        let expected = vec![cue(0.5, "👋"), cue(1.0, "🦀"), cue(1.5, "✨")];
        assert_eq!(session.snapshot().emoji_cues, expected);

        tokio::time::advance(first_delay - Duration::from_millis(1)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(deliveries(), 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(deliveries(), 1);
        assert_eq!(session.state(), SessionState::Open);

        let snapshot = session.completion().await.unwrap();
        assert_eq!(deliveries(), 2);
        assert_eq!(snapshot.emoji_cues, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visual_replaces_avatar_without_finalizing() {
        let session = session();
        for mood in ["calm", "happy"] {
            let avatar = AvatarDescriptor {
                mood: Some(mood.into()),
                ..Default::default()
            };
            session.handle_chunk(StreamChunk::visual(T, avatar)).await;
        }

        assert_eq!(session.state(), SessionState::Open);
        let snapshot = session.snapshot();
        assert_eq!(
            snapshot.avatar_descriptor.as_ref().and_then(|a| a.mood.as_deref()),
            Some("happy")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_cancellation_invalidates_pending_deliveries() {
        let session = session();
        let token = session.cancellation_token();
        let (cancel_count, cancels) = counter();
        let (text_count, texts) = counter();
        let (teardown_count, teardowns) = counter();

        session.on_cancel(move |()| {
            cancel_count.fetch_add(1, Ordering::SeqCst);
        });
        session.on_text(move |_| {
            text_count.fetch_add(1, Ordering::SeqCst);
        });
        session.register_teardown(move || {
            teardown_count.fetch_add(1, Ordering::SeqCst);
        });

        session.handle_chunk(text("never delivered")).await;
        assert_eq!(session.pending_timers(), 1);

        token.cancel();
        token.cancel();
        assert_eq!(session.completion().await, Err(StreamError::Cancelled));

        session.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.pending_timers(), 0);
        assert_eq!(cancels(), 1);
        assert_eq!(texts(), 0);
        assert_eq!(teardowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_rejects_completion() {
        let session = session();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        session.on_error(move |e| sink.lock().push(e.clone()));
        let (complete_count, completes) = counter();
        session.on_complete(move |_| {
            complete_count.fetch_add(1, Ordering::SeqCst);
        });

        let err = StreamError::Remote("model crashed".into());
        session.fail(err.clone());
        session.fail(StreamError::Remote("second".into()));
        session.complete().await;

        assert_eq!(session.completion().await, Err(err.clone()));
        assert_eq!(*errors.lock(), vec![err.clone()]);
        assert_eq!(completes(), 0);
        assert_eq!(session.error(), Some(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_after_completion_are_ignored() {
        let session = session();
        session.complete().await;
        session.complete().await;
        session.handle_chunk(text("late")).await;

        assert_eq!(session.snapshot().text, "");
        assert_eq!(session.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_after_terminal_runs_immediately() {
        let session = session();
        session.complete().await;

        let (count, runs) = counter();
        session.register_teardown(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_highlights_and_subtitles_merge() {
        let session = session();
        let mut first = TextChunk::new("Streaming responses arrive. ");
        first.subtitles = Some(vec![SubtitleCue::new(0.0, 1.0, "draft")]);
        first.highlight_keywords = Some(vec!["server".into()]);
        session
            .handle_chunk(StreamChunk::new(T, ChunkPayload::Text(first)))
            .await;
        assert_eq!(session.snapshot().highlight_keywords, vec!["server"]);

        let mut second = TextChunk::new("Streaming again.").finished();
        second.subtitles = Some(vec![
            SubtitleCue::new(0.004, 1.2, "final"),
            SubtitleCue::new(1.5, 2.0, "next"),
        ]);
        session
            .handle_chunk(StreamChunk::new(T, ChunkPayload::Text(second)))
            .await;

        let snapshot = session.completion().await.unwrap();
        let texts: Vec<&str> = snapshot.subtitles.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["final", "next"]);
        // recomputed from the final buffer
        assert_eq!(snapshot.highlight_keywords[0], "streaming");
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_stream_ends_after_terminal_event() {
        let session = session();
        let mut updates = session.updates();

        session.handle_chunk(done("Hello.")).await;
        let mut kinds = Vec::new();
        while let Some(event) = updates.next().await {
            kinds.push(match event {
                SessionEvent::Text(_) => "text",
                SessionEvent::Completed(_) => "completed",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["text", "completed"]);

        let mut late = session.updates();
        assert!(matches!(late.next().await, Some(SessionEvent::Completed(_))));
        assert!(late.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_persists_and_cancellation_does_not() {
        let cache = ReplayCache::memory();
        let completed_key = CacheKey::new("conv", "done");
        let cancelled_key = CacheKey::new("conv", "cancelled");

        let completed = StreamSession::with_replay(
            SessionConfig::default(),
            CancellationToken::new(),
            cache.clone(),
            completed_key.clone(),
        );
        completed.handle_chunk(done("Kept for replay.")).await;
        completed.completion().await.unwrap();

        let cancelled = StreamSession::with_replay(
            SessionConfig::default(),
            CancellationToken::new(),
            cache.clone(),
            cancelled_key.clone(),
        );
        cancelled.handle_chunk(done("Thrown away.")).await;
        cancelled.cancel();

        let kept = cache.get_cached_snapshot("conv", "done").await.unwrap();
        assert_eq!(kept.text, "Kept for replay.");
        assert!(cache.get_cached_snapshot("conv", "cancelled").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_transport_tags_snapshot() {
        let session = session();
        session.bind_transport(TransportKind::SocketChannel);
        session.handle_chunk(done("hi")).await;
        let snapshot = session.completion().await.unwrap();
        assert_eq!(snapshot.transport, TransportKind::SocketChannel);
        assert_eq!(session.transport(), Some(TransportKind::SocketChannel));
    }
}
