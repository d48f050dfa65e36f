use std::collections::VecDeque;

use super::{retained_after_eviction, DataStorage};
use crate::error::Result;

/// In-process envelope buffer bounded by `capacity`
///
/// `load` hands out the live buffer, so there is nothing to commit in `sync`.
#[derive(Debug)]
pub struct MemoryStorage {
    buffer: VecDeque<String>,
    capacity: usize,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Once the buffer reaches capacity, keep only the newest quarter.
    fn evict(&mut self) {
        if self.buffer.len() < self.capacity {
            return;
        }
        let keep = retained_after_eviction(self.capacity).min(self.buffer.len());
        let removed = self.buffer.len() - keep;
        if removed == 0 {
            return;
        }
        self.buffer.drain(..removed);
        tracing::warn!(
            removed,
            kept = keep,
            capacity = self.capacity,
            "Storage full, evicted oldest envelopes"
        );
    }
}

impl DataStorage for MemoryStorage {
    fn save(&mut self, envelope: String) {
        self.buffer.push_back(envelope);
        self.evict();
    }

    fn load(&mut self) -> &mut VecDeque<String> {
        self.evict();
        &mut self.buffer
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn pending_count(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_returns_live_buffer() {
        let mut storage = MemoryStorage::new(10);
        storage.save("a".to_string());
        storage.save("b".to_string());

        let working = storage.load();
        assert_eq!(working.len(), 2);
        working.pop_front();

        // Loading twice does not duplicate
        assert_eq!(storage.load().len(), 1);
        storage.sync().unwrap();
        assert_eq!(storage.pending_count(), 1);
        assert_eq!(storage.load().front().map(String::as_str), Some("b"));
    }

    #[test]
    fn test_eviction_keeps_newest_quarter() {
        let mut storage = MemoryStorage::new(8);
        for i in 0..7 {
            storage.save(format!("e{}", i));
        }
        assert_eq!(storage.pending_count(), 7);

        // The eighth save hits capacity
        storage.save("e7".to_string());
        assert_eq!(storage.pending_count(), 2);
        let kept: Vec<_> = storage.load().iter().cloned().collect();
        assert_eq!(kept, vec!["e6", "e7"]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut storage = MemoryStorage::new(5);
        for i in 0..100 {
            storage.save(format!("e{}", i));
            assert!(storage.pending_count() < 5);
        }
        assert_eq!(storage.load().back().map(String::as_str), Some("e99"));
    }

    #[test]
    fn test_capacity_of_one() {
        let mut storage = MemoryStorage::new(1);
        storage.save("a".to_string());
        storage.save("b".to_string());
        assert_eq!(storage.pending_count(), 1);
        assert_eq!(storage.load().front().map(String::as_str), Some("b"));
    }
}
