//! Lamport logical time.

use std::sync::atomic::{AtomicU64, Ordering};

/// A Lamport logical clock.
///
/// The connection front-end merges remote clock values into it while the
/// response worker reads and ticks it, so all three operations are atomic.
/// The observed value never decreases over the lifetime of the process.
#[derive(Debug, Default)]
pub struct LamportClock {
    time: AtomicU64,
}

impl LamportClock {
    /// creates a clock starting at zero
    pub fn new() -> Self {
        LamportClock {
            time: AtomicU64::new(0),
        }
    }

    /// increments the clock for a local event and returns the new value
    pub fn tick(&self) -> u64 {
        self.time.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// merges a clock value received from another node, keeping the maximum
    pub fn merge(&self, remote: u64) {
        self.time.fetch_max(remote, Ordering::SeqCst);
    }

    /// returns the current clock value
    pub fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_increments_and_returns_new_value() {
        let clock = LamportClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.now(), 2);
    }

    #[test]
    fn merge_keeps_maximum() {
        let clock = LamportClock::new();
        clock.merge(7);
        assert_eq!(clock.now(), 7);
        clock.merge(3);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn never_decreases_under_interleaving() {
        let clock = LamportClock::new();
        let mut last = 0;
        for remote in [5, 3, 9, 1, 9, 12] {
            clock.merge(remote);
            let seen = clock.tick();
            assert!(seen > last);
            last = seen;
        }
    }
}
