//! Liveness tracking for content producers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// A producer removed by the expiry sweep, with the station record it owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    /// id the producer reported under
    pub producer_id: String,
    /// station id of the last record it pushed
    pub record_id: String,
}

// last-seen state for one producer
#[derive(Debug)]
struct Tracker {
    last_seen: Instant,
    lamport: u64,
    record_id: String,
}

/// Tracks when each producer last pushed, so that silent producers can be
/// expired and their records dropped from the cache.
///
/// There is exactly one tracker per live producer id. Every accepted push
/// refreshes the tracker's last-seen instant; the sweep removes trackers
/// that have been idle longer than the configured threshold, regardless of
/// whether the producer's socket is still open.
#[derive(Debug)]
pub struct ProducerRegistry {
    trackers: HashMap<String, Tracker>,
    max_idle: Duration,
}

impl ProducerRegistry {
    /// creates a registry expiring producers idle longer than `max_idle`
    pub fn new(max_idle: Duration) -> Self {
        ProducerRegistry {
            trackers: HashMap::new(),
            max_idle,
        }
    }

    /// Records a push from `producer_id` carrying the record stored under
    /// `record_id`, creating the tracker on first contact.
    pub fn observe(&mut self, producer_id: &str, record_id: &str, lamport: u64) {
        let now = Instant::now();
        let tracker = self
            .trackers
            .entry(producer_id.to_string())
            .or_insert_with(|| Tracker {
                last_seen: now,
                lamport,
                record_id: record_id.to_string(),
            });
        tracker.last_seen = now;
        tracker.lamport = lamport;
        tracker.record_id = record_id.to_string();
    }

    /// Removes and returns every producer idle longer than the threshold.
    pub fn expire(&mut self) -> Vec<Expired> {
        let now = Instant::now();
        let max_idle = self.max_idle;
        let expired_ids: Vec<String> = self
            .trackers
            .iter()
            .filter(|(_, tracker)| now.duration_since(tracker.last_seen) > max_idle)
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|producer_id| {
                self.trackers.remove(&producer_id).map(|tracker| {
                    debug!(
                        producer = %producer_id,
                        lamport = tracker.lamport,
                        "producer expired"
                    );
                    Expired {
                        producer_id,
                        record_id: tracker.record_id,
                    }
                })
            })
            .collect()
    }

    /// number of producers currently tracked
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// true when no producers are tracked
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn observe_creates_then_refreshes() {
        let mut registry = ProducerRegistry::new(Duration::from_secs(30));
        registry.observe("cs-1", "IDS60901", 1);
        registry.observe("cs-1", "IDS60901", 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn idle_producers_expire_with_their_record() {
        let mut registry = ProducerRegistry::new(Duration::from_millis(10));
        registry.observe("cs-1", "IDS60901", 1);
        thread::sleep(Duration::from_millis(30));
        let expired = registry.expire();
        assert_eq!(
            expired,
            vec![Expired {
                producer_id: "cs-1".to_string(),
                record_id: "IDS60901".to_string(),
            }]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn fresh_producers_survive_the_sweep() {
        let mut registry = ProducerRegistry::new(Duration::from_millis(50));
        registry.observe("cs-1", "IDS60901", 1);
        thread::sleep(Duration::from_millis(30));
        registry.observe("cs-2", "IDS60902", 2);
        // cs-1 is idle but still under the threshold, cs-2 is fresh
        assert!(registry.expire().is_empty());
        assert_eq!(registry.len(), 2);
    }
}
