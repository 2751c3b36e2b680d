//! # Exponential Backoff
//!
//! Provides an exponential backoff mechanism with optional jitter for the
//! per-context readiness retry loop.
//!
//! Delays are calculated in milliseconds. Each call to [`Backoff::get`] returns
//! the current delay and grows the next one by the configured multiplier, up to
//! a ceiling. Jitter is a uniformly random addition that spreads reconnect
//! attempts of many contexts apart so they never storm a recovering cluster in
//! lockstep.

/// Exponential backoff calculator.
///
/// One instance per context loop; the value is never shared across tasks.
/// The internal delay only ever grows up to `max` and then holds there, so
/// repeated calls at the ceiling return a constant delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay returned by the next `get()` call, in milliseconds
    value: u64,
    /// Initial delay in milliseconds (for reset)
    initial: u64,
    /// Growth factor applied after each `get()` below the ceiling
    multiplier: u64,
    /// Maximum delay in milliseconds
    max: u64,
    /// Upper bound (exclusive) of the random jitter added on growth and reset
    jitter: u64,
}

impl Backoff {
    /// Create a new backoff starting at `value` milliseconds.
    ///
    /// A fresh jitter amount is added to the starting value immediately, so the
    /// very first delay already lands in `[value, value + jitter)`.
    #[must_use]
    pub fn new(value: u64, multiplier: u64, max: u64, jitter: u64) -> Self {
        Self {
            value: value + random_jitter(jitter),
            initial: value,
            multiplier,
            max,
            jitter,
        }
    }

    /// Return the current delay in milliseconds and advance the sequence.
    ///
    /// While the current delay is below `max`, the next delay becomes
    /// `value * multiplier + jitter()`, capped at `max`. At or above `max` the
    /// value is held constant rather than growing without bound.
    pub fn get(&mut self) -> u64 {
        let current = self.value;
        if self.value < self.max {
            let grown = self.value.saturating_mul(self.multiplier) + random_jitter(self.jitter);
            self.value = grown.min(self.max);
        }
        current
    }

    /// Reset the delay to the initial value plus a fresh jitter amount.
    ///
    /// Called whenever a context becomes reachable again, so the next outage
    /// starts retrying quickly instead of inheriting the previous ceiling.
    pub fn reset(&mut self) {
        self.value = self.initial + random_jitter(self.jitter);
    }
}

/// Uniformly random integer in `[0, jitter)`, or 0 when jitter is disabled.
fn random_jitter(jitter: u64) -> u64 {
    if jitter == 0 {
        0
    } else {
        rand::random_range(0..jitter)
    }
}
