//! Session Lifecycle
//!
//! The terminal-state machine shared by sessions and the fallback
//! synthesizer, and the one-shot settlement that backs their completion
//! futures.

use std::future::Future;

use tokio::sync::watch;

use crate::error::StreamError;

/// Lifecycle state of a session or synthesizer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepting chunks
    Open,
    /// Finished normally; the snapshot was frozen (and persisted)
    Completed,
    /// Aborted through the cancellation token; nothing persisted
    Cancelled,
    /// Failed; the completion future rejects
    Errored,
}

impl SessionState {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// One-shot outcome cell with any number of waiters
///
/// Dropping the cell unsettled resolves waiters with
/// [`StreamError::Abandoned`].
#[derive(Debug)]
pub(crate) struct Settlement<T> {
    tx: watch::Sender<Option<Result<T, StreamError>>>,
}

impl<T> Settlement<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Settle with `outcome`; later calls are ignored
    pub(crate) fn settle(&self, outcome: Result<T, StreamError>) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Future resolving with the outcome
    pub(crate) fn wait(&self) -> impl Future<Output = Result<T, StreamError>> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone().unwrap_or(Err(StreamError::Abandoned)),
                Err(_) => Err(StreamError::Abandoned),
            }
        }
    }
}
