//! Bounded staging buffer between producers and the event store.
//!
//! Producers never block on storage: `push` always succeeds, evicting the
//! oldest staged event when the buffer is full.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use agentlog_store::Event;

/// Fixed-capacity FIFO of events awaiting flush.
#[derive(Debug)]
pub struct EventBuffer {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventBuffer {
    /// Create a buffer holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        // A poisoned queue still holds valid events.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stage an event. Returns `true` if the oldest event was evicted to
    /// make room.
    pub fn push(&self, event: Event) -> bool {
        let mut queue = self.lock();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        queue.push_back(event);
        evicted
    }

    /// Remove up to `max` events from the front, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Event> {
        let mut queue = self.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Put events that failed to flush back at the front, preserving their
    /// order. If that overflows the buffer the oldest events are evicted.
    /// Returns the number evicted.
    pub fn requeue_front(&self, events: Vec<Event>) -> usize {
        let mut queue = self.lock();
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
        let mut evicted = 0;
        while queue.len() > self.capacity {
            queue.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlog_store::{EventType, LogLevel};

    fn ev(msg: &str) -> Event {
        Event::new(EventType::System, LogLevel::Info, msg)
    }

    fn messages(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn overflow_evicts_oldest() {
        let buf = EventBuffer::new(2);
        assert!(!buf.push(ev("a")));
        assert!(!buf.push(ev("b")));
        assert!(buf.push(ev("c")));
        assert_eq!(buf.dropped(), 1);
        assert_eq!(messages(&buf.drain(10)), vec!["b", "c"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_respects_batch_size() {
        let buf = EventBuffer::new(10);
        for m in ["a", "b", "c"] {
            buf.push(ev(m));
        }
        assert_eq!(messages(&buf.drain(2)), vec!["a", "b"]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn requeue_preserves_order_and_bounds() {
        let buf = EventBuffer::new(3);
        buf.push(ev("a"));
        buf.push(ev("b"));
        let batch = buf.drain(2);
        buf.push(ev("c"));
        buf.push(ev("d"));
        // a, b go back in front of c, d; capacity 3 evicts a.
        assert_eq!(buf.requeue_front(batch), 1);
        assert_eq!(messages(&buf.drain(10)), vec!["b", "c", "d"]);
        assert_eq!(buf.dropped(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buf = EventBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.push(ev("a"));
        assert!(buf.push(ev("b")));
        assert_eq!(buf.len(), 1);
    }
}
