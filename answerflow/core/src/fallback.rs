//! Fallback Chunk Synthesizer
//!
//! Plays a fully known answer back as if it were streamed: text appended
//! through [`SynthControls::append`] is split into token units and emitted
//! `tokens_per_chunk` units per tick, one tick every `chunk_delay`.
//!
//! Every tick is a tracked timer. Any terminal transition (finalize drained,
//! [`fail`](SynthControls::fail), cancellation) closes the timer set before it
//! returns, so no token listener fires afterwards.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StreamError;
use crate::session::{ListenerId, ListenerSet, SessionState, Settlement, TimerSet};
use crate::tokenizer::token_chunks;

/// Pacing for synthesized playback
#[derive(Clone, Debug)]
pub struct SynthOptions {
    /// Delay between emitted batches
    pub chunk_delay: Duration,
    /// Token units per batch
    pub tokens_per_chunk: usize,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            chunk_delay: Duration::from_millis(45),
            tokens_per_chunk: 3,
        }
    }
}

struct SynthCore {
    state: SessionState,
    queue: VecDeque<String>,
    emitted: String,
    finalize: bool,
    draining: bool,
}

struct SynthInner {
    core: Mutex<SynthCore>,
    gate: ReentrantMutex<()>,
    tokens: ListenerSet<String>,
    complete: ListenerSet<String>,
    errors: ListenerSet<StreamError>,
    cancels: ListenerSet<()>,
    timers: TimerSet,
    cancel: CancellationToken,
    settlement: Settlement<String>,
    options: SynthOptions,
}

/// Observer side of a synthesized stream
#[derive(Clone)]
pub struct SynthStream {
    inner: Arc<SynthInner>,
}

/// Producer side of a synthesized stream
#[derive(Clone)]
pub struct SynthControls {
    inner: Arc<SynthInner>,
}

/// Start a synthesized stream driven by `cancel`
///
/// Must be called inside a Tokio runtime.
#[must_use]
pub fn synthesize(cancel: CancellationToken, options: SynthOptions) -> (SynthStream, SynthControls) {
    let inner = Arc::new(SynthInner {
        core: Mutex::new(SynthCore {
            state: SessionState::Open,
            queue: VecDeque::new(),
            emitted: String::new(),
            finalize: false,
            draining: false,
        }),
        gate: ReentrantMutex::new(()),
        tokens: ListenerSet::new(),
        complete: ListenerSet::new(),
        errors: ListenerSet::new(),
        cancels: ListenerSet::new(),
        timers: TimerSet::new(cancel.clone()),
        cancel,
        settlement: Settlement::new(),
        options,
    });

    let weak: Weak<SynthInner> = Arc::downgrade(&inner);
    let token = inner.cancel.clone();
    let settled = inner.settlement.wait();
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {
                if let Some(inner) = weak.upgrade() {
                    finish_cancelled(&inner);
                }
            }
            _ = settled => {}
        }
    });

    (
        SynthStream {
            inner: Arc::clone(&inner),
        },
        SynthControls { inner },
    )
}

impl SynthStream {
    /// Called with each emitted batch
    pub fn on_token<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.tokens.subscribe(listener)
    }

    /// Called once with the full emitted text
    pub fn on_complete<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.complete.subscribe(listener)
    }

    /// Called once when the stream is failed
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.inner.errors.subscribe(listener)
    }

    /// Called once when the stream is cancelled
    pub fn on_cancel<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.cancels.subscribe(listener)
    }

    /// Resolves with the full text, or rejects with the failing error
    pub fn completion(&self) -> impl Future<Output = Result<String, StreamError>> + Send + 'static {
        self.inner.settlement.wait()
    }

    /// Ticks still scheduled
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// Text emitted so far
    #[must_use]
    pub fn emitted(&self) -> String {
        self.inner.core.lock().emitted.clone()
    }
}

impl SynthControls {
    /// Queue `text` for playback; with `finalize`, complete once drained
    ///
    /// Returns `false` if the stream already terminated.
    pub fn append(&self, text: &str, finalize: bool) -> bool {
        let start = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return false;
            }
            core.queue.extend(token_chunks(text));
            core.finalize |= finalize;
            !std::mem::replace(&mut core.draining, true)
        };
        if start {
            schedule_tick(&self.inner);
        }
        true
    }

    /// Fail the stream with exactly `error`
    pub fn fail(&self, error: StreamError) {
        let inner = &self.inner;
        let _gate = inner.gate.lock();
        if !transition(inner, SessionState::Errored) {
            return;
        }
        inner.timers.close();
        inner.errors.notify(&error);
        clear_listeners(inner);
        inner.settlement.settle(Err(error));
    }

    /// Cancel the stream and its token
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        finish_cancelled(&self.inner);
    }
}

fn transition(inner: &SynthInner, target: SessionState) -> bool {
    let mut core = inner.core.lock();
    if core.state.is_terminal() {
        return false;
    }
    core.state = target;
    core.queue.clear();
    core.draining = false;
    true
}

fn clear_listeners(inner: &SynthInner) {
    inner.tokens.clear();
    inner.complete.clear();
    inner.errors.clear();
    inner.cancels.clear();
}

fn finish_cancelled(inner: &SynthInner) {
    let _gate = inner.gate.lock();
    if !transition(inner, SessionState::Cancelled) {
        return;
    }
    inner.timers.close();
    inner.cancels.notify(&());
    clear_listeners(inner);
    inner.settlement.settle(Err(StreamError::Cancelled));
    debug!("Synthesized stream cancelled");
}

fn schedule_tick(inner: &Arc<SynthInner>) {
    let next = Arc::clone(inner);
    inner
        .timers
        .schedule(inner.options.chunk_delay, async move { tick(&next) });
}

enum TickOutcome {
    Continue,
    Idle,
    Finished(String),
}

fn tick(inner: &Arc<SynthInner>) {
    let _gate = inner.gate.lock();
    let (batch, outcome) = {
        let mut core = inner.core.lock();
        if core.state.is_terminal() {
            return;
        }
        let take = inner.options.tokens_per_chunk.max(1).min(core.queue.len());
        let batch: String = core.queue.drain(..take).collect();
        core.emitted.push_str(&batch);

        let outcome = if !core.queue.is_empty() {
            TickOutcome::Continue
        } else if core.finalize {
            core.state = SessionState::Completed;
            core.draining = false;
            TickOutcome::Finished(core.emitted.clone())
        } else {
            core.draining = false;
            TickOutcome::Idle
        };
        (batch, outcome)
    };

    if !batch.is_empty() {
        inner.tokens.notify(&batch);
    }

    match outcome {
        TickOutcome::Continue => schedule_tick(inner),
        TickOutcome::Idle => {}
        TickOutcome::Finished(text) => {
            inner.timers.close();
            inner.complete.notify(&text);
            clear_listeners(inner);
            inner.settlement.settle(Ok(text));
        }
    }
}
