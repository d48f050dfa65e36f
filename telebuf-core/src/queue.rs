//! Ingestion queue between producers and the delivery worker
//!
//! Producers push records from any thread; the worker takes everything at
//! once, at most once per tick, so the lock is held only for a push or a swap.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::record::UploadRecord;

/// Unbounded, thread-safe FIFO of records not yet serialized
#[derive(Debug, Default)]
pub struct IngestQueue {
    records: Mutex<VecDeque<UploadRecord>>,
}

impl IngestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Never fails and never waits on I/O.
    pub fn enqueue(&self, record: UploadRecord) {
        self.lock().push_back(record);
    }

    /// Move every queued record out, leaving the queue empty.
    ///
    /// Records enqueued after the swap wait for the next drain.
    pub fn drain_all(&self) -> Vec<UploadRecord> {
        let drained = std::mem::take(&mut *self.lock());
        drained.into()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<UploadRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let queue = IngestQueue::new();
        for i in 0..3 {
            queue.enqueue(UploadRecord::event(format!("e{}", i)));
        }
        assert_eq!(queue.len(), 3);

        let drained = queue.drain_all();
        let names: Vec<_> = drained
            .iter()
            .map(|r| r.system_string("eid", ""))
            .collect();
        assert_eq!(names, vec!["e0", "e1", "e2"]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(IngestQueue::new());
        let mut handles = Vec::new();

        for producer in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    queue.enqueue(UploadRecord::event(format!("p{}-{}", producer, i)));
                }
            }));
        }

        let mut drained = Vec::new();
        while handles.iter().any(|h| !h.is_finished()) {
            drained.extend(queue.drain_all());
        }
        for handle in handles {
            handle.join().unwrap();
        }
        drained.extend(queue.drain_all());

        assert_eq!(drained.len(), 1000);

        // Per-producer order survives interleaving
        for producer in 0..4 {
            let prefix = format!("p{}-", producer);
            let seq: Vec<usize> = drained
                .iter()
                .map(|r| r.system_string("eid", ""))
                .filter_map(|name| name.strip_prefix(&prefix).map(|n| n.parse().unwrap()))
                .collect();
            assert_eq!(seq, (0..250).collect::<Vec<_>>());
        }
    }
}
