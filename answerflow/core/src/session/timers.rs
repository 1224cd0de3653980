//! Tracked Timers
//!
//! Every paced callback in the engine is a task owned by a [`TimerSet`].
//! Closing the set aborts all outstanding tasks synchronously and refuses new
//! ones, so no scheduled callback can fire after a terminal transition. Tasks
//! also observe the owner's cancellation token.
//!
//! A task removes itself from the set before running its callback; a callback
//! that is already running is not aborted by [`TimerSet::close`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    tasks: HashMap<u64, AbortHandle>,
    closed: bool,
}

/// A set of delayed tasks that can be invalidated at once
///
/// Scheduling requires a Tokio runtime.
pub struct TimerSet {
    table: Arc<Mutex<TimerTable>>,
    cancel: CancellationToken,
}

impl TimerSet {
    /// Create a set whose tasks stop when `cancel` fires
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            cancel,
        }
    }

    /// Run `callback` after `delay`
    ///
    /// Returns `false` (and drops the callback) when the set is closed.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut table = self.table.lock();
        if table.closed || self.cancel.is_cancelled() {
            return false;
        }

        let id = table.next_id;
        table.next_id += 1;

        let shared = Arc::clone(&self.table);
        let cancel = self.cancel.clone();
        // The table stays locked until the handle is inserted, so the task
        // cannot observe its own id missing.
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    shared.lock().tasks.remove(&id);
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            if shared.lock().tasks.remove(&id).is_none() {
                return;
            }
            callback.await;
        });
        table.tasks.insert(id, handle.abort_handle());
        true
    }

    /// Number of timers that have not fired yet
    #[must_use]
    pub fn pending(&self) -> usize {
        self.table.lock().tasks.len()
    }

    /// Whether the set refuses new timers
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    /// Abort every pending timer and refuse new ones
    pub fn close(&self) {
        let drained: Vec<AbortHandle> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in drained {
            handle.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TimerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("TimerSet")
            .field("pending", &table.tasks.len())
            .field("closed", &table.closed)
            .finish()
    }
}
