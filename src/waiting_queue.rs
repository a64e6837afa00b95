//! Cancelable delay queue, used by the Sent/Received waiting processors to
//! wake up exactly when a message's retry timer expires.
//!
//! Entries carry an explicit `wait_till` deadline and are popped in deadline
//! order via a binary heap, so a queue holding messages with wildly
//! different timeouts never has to scan past ones that still have a long
//! time left — the earlier cancelable-FIFO queue this replaces had to walk
//! the whole list to find expired entries and cancellation meant a linear
//! search-and-remove.  Cancellation here is a single atomic store: a
//! cancelled entry is simply skipped, for free, the next time it reaches the
//! head of the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Handle returned on insertion; dropping it does nothing, but calling
/// `cancel` marks the entry dead so it is skipped instead of popped.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Mark the associated entry as cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Relaxed);
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }
}

struct Entry<T> {
    wait_till: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.wait_till == other.wait_till && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) yields the earliest deadline
        // first, ties broken by insertion order.
        other.wait_till.cmp(&self.wait_till).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A deadline-ordered queue of cancelable, timed entries.
pub struct WaitingQueue<T> {
    heap: Mutex<BinaryHeap<Entry<T>>>,
    next_seq: AtomicU64,
}

impl<T> Default for WaitingQueue<T> {
    fn default() -> Self {
        Self { heap: Mutex::new(BinaryHeap::new()), next_seq: AtomicU64::new(0) }
    }
}

impl<T> WaitingQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, to become eligible for popping once `wait_till` has
    /// passed. Returns a handle that can cancel the entry before then.
    pub fn insert(&self, wait_till: Instant, value: T) -> CancelHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(Entry { wait_till, seq, cancelled: cancelled.clone(), value });
        CancelHandle { cancelled }
    }

    /// Pop and return the single earliest entry if its deadline has passed
    /// as of `now`, skipping (and discarding) any cancelled entries found
    /// along the way.
    pub fn pop_ready(&self, now: Instant) -> Option<T> {
        let mut heap = self.heap.lock();
        loop {
            match heap.peek() {
                Some(entry) if entry.wait_till <= now => {
                    let entry = heap.pop().unwrap();
                    if !entry.cancelled.load(AtomicOrdering::Relaxed) {
                        return Some(entry.value);
                    }
                }
                _ => return None,
            }
        }
    }

    /// Pop every entry whose deadline has passed as of `now`.
    pub fn drain_ready(&self, now: Instant) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(value) = self.pop_ready(now) {
            out.push(value);
        }
        out
    }

    /// Deadline of the earliest non-cancelled entry, if any, used by worker
    /// loops to size their next poll sleep instead of busy-waiting.
    pub fn next_deadline(&self) -> Option<Instant> {
        let heap = self.heap.lock();
        heap.iter().filter(|e| !e.cancelled.load(AtomicOrdering::Relaxed)).map(|e| e.wait_till).min()
    }

    /// Number of entries still in the queue, including cancelled ones not
    /// yet popped.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether the queue holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
