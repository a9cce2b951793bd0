//! The pending-work queue between the connection front-end and the worker.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::work::WorkItem;

/// A single-consumer queue of [`WorkItem`]s ordered by Lamport value
/// ascending, first-in-first-out on ties.
///
/// The connection front-end enqueues, the response worker polls; both
/// operations are non-blocking. When the front-end absorbs several requests
/// in one cycle the worker therefore drains them in causal order, not in
/// network arrival order. A one-slot doorbell channel lets the idle worker
/// wait for work with a bounded timeout instead of a blind sleep.
#[derive(Debug)]
pub struct RequestQueue {
    heap: Mutex<BinaryHeap<Reverse<Queued>>>,
    arrivals: AtomicU64,
    doorbell_tx: Sender<()>,
    doorbell_rx: Receiver<()>,
}

impl RequestQueue {
    /// creates an empty queue
    pub fn new() -> Self {
        let (doorbell_tx, doorbell_rx) = bounded(1);
        RequestQueue {
            heap: Mutex::new(BinaryHeap::new()),
            arrivals: AtomicU64::new(0),
            doorbell_tx,
            doorbell_rx,
        }
    }

    /// adds an item, keyed by its remote Lamport value
    pub fn enqueue(&self, item: WorkItem) {
        let queued = Queued {
            lamport: item.remote_lamport(),
            seq: self.arrivals.fetch_add(1, AtomicOrdering::SeqCst),
            item,
        };
        self.lock().push(Reverse(queued));
        // wake the worker if it is parked; a full doorbell already will
        let _ = self.doorbell_tx.try_send(());
    }

    /// removes and returns the causally earliest item, if any
    pub fn poll(&self) -> Option<WorkItem> {
        self.lock().pop().map(|Reverse(queued)| queued.item)
    }

    /// parks the caller until an enqueue rings the doorbell or `timeout`
    /// elapses; the caller re-polls either way
    pub fn wait(&self, timeout: Duration) {
        let _ = self.doorbell_rx.recv_timeout(timeout);
    }

    /// number of items waiting
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// true when no items are waiting
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Reverse<Queued>>> {
        self.heap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

// heap entry; ordered by (lamport, arrival) so ties stay first-in-first-out
#[derive(Debug)]
struct Queued {
    lamport: u64,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.lamport == other.lamport && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then(self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    // queue items need a socket; loop one back over an ephemeral listener
    fn loopback() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _ = listener.accept().unwrap();
        stream
    }

    fn fetch(id: &str, lamport: u64) -> WorkItem {
        WorkItem::Fetch {
            id: id.to_string(),
            remote_lamport: lamport,
            stream: loopback(),
        }
    }

    #[test]
    fn polls_in_ascending_lamport_order() {
        let queue = RequestQueue::new();
        for lamport in [5, 3, 7, 1, 9] {
            queue.enqueue(fetch("x", lamport));
        }
        let mut seen = Vec::new();
        while let Some(item) = queue.poll() {
            seen.push(item.remote_lamport());
        }
        assert_eq!(seen, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn ties_stay_first_in_first_out() {
        let queue = RequestQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(fetch(id, 4));
        }
        let mut seen = Vec::new();
        while let Some(WorkItem::Fetch { id, .. }) = queue.poll() {
            seen.push(id);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn poll_on_empty_returns_none() {
        let queue = RequestQueue::new();
        assert!(queue.poll().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_rings_the_doorbell() {
        let queue = RequestQueue::new();
        queue.enqueue(fetch("x", 1));
        // the doorbell holds a token, so this wait returns promptly
        queue.wait(Duration::from_millis(100));
        assert_eq!(queue.len(), 1);
    }
}
