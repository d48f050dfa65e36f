//! Durable staging for serialized envelopes
//!
//! The delivery worker persists every envelope it builds, then loads the
//! working set, attempts delivery, and commits the outcome:
//!
//! ```text
//! save(envelope)* ──► load() ──► remove delivered ──► sync()
//! ```
//!
//! Two backends implement [`DataStorage`]:
//! - [`MemoryStorage`] keeps envelopes in process; nothing survives a restart
//! - [`FileStorage`] rotates newline-delimited files in a directory
//!
//! The backend is chosen once by [`open`] and never switched afterwards.
//! Only the delivery worker touches storage, so implementations need no
//! internal locking.

mod file;
mod memory;

pub use file::{FileStorage, FILE_PREFIX, MAX_LINES_PER_FILE};
pub use memory::MemoryStorage;

use std::collections::VecDeque;

use crate::config::CollectorConfig;
use crate::error::Result;

/// Persistence for serialized envelopes between delivery attempts
pub trait DataStorage: Send {
    /// Append one serialized envelope
    fn save(&mut self, envelope: String);

    /// Working set for this delivery attempt.
    ///
    /// The caller removes delivered envelopes from the returned buffer and
    /// then calls [`DataStorage::sync`]. Calling `load` again before `sync`
    /// returns the same working set without re-reading anything.
    fn load(&mut self) -> &mut VecDeque<String>;

    /// Commit the outcome of the last load: drop what was delivered and keep
    /// what remains in the working set.
    fn sync(&mut self) -> Result<()>;

    /// Number of envelopes currently held, including anything at rest
    fn pending_count(&self) -> usize;
}

/// Open the backend selected by the configuration
pub fn open(config: &CollectorConfig) -> Result<Box<dyn DataStorage>> {
    let capacity = config.max_storage_records;
    match &config.storage_dir {
        Some(dir) => {
            tracing::debug!(dir = %dir.display(), capacity, "Using file storage");
            Ok(Box::new(FileStorage::open(dir, capacity)?))
        }
        None => {
            tracing::debug!(capacity, "Using memory storage");
            Ok(Box::new(MemoryStorage::new(capacity)))
        }
    }
}

/// Number of newest entries kept once storage reaches `capacity`
pub(crate) fn retained_after_eviction(capacity: usize) -> usize {
    (capacity / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retained_after_eviction() {
        assert_eq!(retained_after_eviction(1000), 250);
        assert_eq!(retained_after_eviction(10), 2);
        assert_eq!(retained_after_eviction(3), 1);
        assert_eq!(retained_after_eviction(1), 1);
    }

    #[test]
    fn test_open_selects_backend() {
        let config = CollectorConfig::new("test.local", 8081, "k");
        let mut storage = open(&config).unwrap();
        storage.save("a".to_string());
        assert_eq!(storage.pending_count(), 1);

        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            storage_dir: Some(dir.path().join("outbox")),
            ..CollectorConfig::new("test.local", 8081, "k")
        };
        let mut storage = open(&config).unwrap();
        storage.save("a".to_string());
        storage.load();
        storage.sync().unwrap();
        assert!(dir.path().join("outbox").is_dir());
        assert_eq!(storage.pending_count(), 1);
    }
}
