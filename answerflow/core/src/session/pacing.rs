//! Adaptive Pacing
//!
//! Text delivery is delayed to approximate reading speed. The playback rate is
//! an exponentially weighted moving average of `max(0.5, len / 32)` over chunk
//! lengths, clamped to `[0.5, 3.0]`; each chunk is delivered
//! `window / rate` after it arrives. Content order does not depend on the
//! deadlines: every delivery takes the oldest queued chunk.

use std::time::Duration;

/// Rate before any chunk is observed
pub const INITIAL_RATE: f64 = 1.0;
/// Slowest playback rate
pub const MIN_RATE: f64 = 0.5;
/// Fastest playback rate
pub const MAX_RATE: f64 = 3.0;
/// Weight of the previous rate in the moving average
pub const PREVIOUS_WEIGHT: f64 = 0.7;
/// Weight of the new sample in the moving average
pub const SAMPLE_WEIGHT: f64 = 0.3;
/// Characters that correspond to a rate of 1.0
pub const CHARS_PER_UNIT: f64 = 32.0;

/// Computes delivery deadlines for paced text chunks
#[derive(Debug, Clone)]
pub struct AdaptivePacer {
    window: Duration,
    rate: f64,
}

impl AdaptivePacer {
    /// Create a pacer with the given adaptive window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            rate: INITIAL_RATE,
        }
    }

    /// Current playback rate
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Fold a chunk of `chars` characters into the playback rate
    pub fn observe(&mut self, chars: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let sample = (chars as f64 / CHARS_PER_UNIT).max(MIN_RATE);
        self.rate = (PREVIOUS_WEIGHT * self.rate + SAMPLE_WEIGHT * sample).clamp(MIN_RATE, MAX_RATE);
        self.rate
    }

    /// Delay for the current rate
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.window.div_f64(self.rate)
    }

    /// Observe a chunk of `chars` characters and return how long to wait
    /// before delivering it
    pub fn schedule(&mut self, chars: usize) -> Duration {
        self.observe(chars);
        self.delay()
    }
}
