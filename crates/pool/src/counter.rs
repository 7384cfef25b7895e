//! Linearizable shared counter
//!
//! Every operation takes the same lock and returns the value it left behind,
//! so callers can increment, inspect the result and revert without racing
//! other threads.

use parking_lot::Mutex;

/// Shared integer used as an admission signal
///
/// # Example
///
/// ```
/// use vecflow_pool::AtomicCounter;
///
/// let slots = AtomicCounter::new(1);
/// assert_eq!(slots.decrement(), 0);
/// if slots.decrement() < 0 {
///     slots.increment(); // over capacity, undo
/// }
/// assert_eq!(slots.value(), 0);
/// ```
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: Mutex<i64>,
}

impl AtomicCounter {
    /// Create a counter starting at `initial`
    pub fn new(initial: i64) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    /// Add one and return the new value
    pub fn increment(&self) -> i64 {
        self.increment_by(1)
    }

    /// Subtract one and return the new value
    pub fn decrement(&self) -> i64 {
        self.decrement_by(1)
    }

    /// Add `delta` (may be negative) and return the new value
    pub fn increment_by(&self, delta: i64) -> i64 {
        let mut value = self.value.lock();
        *value += delta;
        *value
    }

    /// Subtract `delta` (may be negative) and return the new value
    pub fn decrement_by(&self, delta: i64) -> i64 {
        let mut value = self.value.lock();
        *value -= delta;
        *value
    }

    /// Current value
    pub fn value(&self) -> i64 {
        *self.value.lock()
    }
}
