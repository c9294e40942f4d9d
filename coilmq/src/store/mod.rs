//! Queue storage backends.
//!
//! A [`QueueStore`] holds frames sent to queue destinations while no
//! eligible subscriber is available. The store is owned by the
//! [`QueueManager`](crate::queue::QueueManager) and only touched while the
//! manager's lock is held, so the trait is synchronous and takes `&mut self`.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use std::fmt;

use coilmq_core::StompFrame;
use coilmq_core::config::{StoreBackend, StoreSettings};
use tracing::info;

use crate::error::{ConfigError, StoreError};

/// Per-destination FIFO frame storage.
pub trait QueueStore: Send + fmt::Debug {
    /// Appends a frame to the destination's queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn enqueue(&mut self, destination: &str, frame: StompFrame) -> Result<(), StoreError>;

    /// Removes and returns the oldest frame for the destination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn dequeue(&mut self, destination: &str) -> Result<Option<StompFrame>, StoreError>;

    /// Returns a frame for redelivery.
    ///
    /// Backends that can, place the frame ahead of everything already
    /// queued for the destination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn requeue(&mut self, destination: &str, frame: StompFrame) -> Result<(), StoreError> {
        self.enqueue(destination, frame)
    }

    /// Number of frames queued for the destination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn size(&self, destination: &str) -> Result<usize, StoreError>;

    /// Whether any frames are queued for the destination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn has_frames(&self, destination: &str) -> Result<bool, StoreError> {
        Ok(self.size(destination)? > 0)
    }

    /// Destinations that currently hold frames.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn destinations(&self) -> Result<Vec<String>, StoreError>;

    /// Releases backend resources. Later calls fail with [`StoreError::Closed`]
    /// for backends that hold external resources.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails to shut down cleanly.
    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Draining iterator over one destination's frames.
///
/// Each call to `next` dequeues a frame; iteration ends when the destination
/// is empty or after the first store error, which is yielded.
pub struct Frames<'a> {
    store: &'a mut dyn QueueStore,
    destination: &'a str,
    failed: bool,
}

impl<'a> Frames<'a> {
    /// Drains `destination` from `store`.
    pub fn new(store: &'a mut dyn QueueStore, destination: &'a str) -> Self {
        Self {
            store,
            destination,
            failed: false,
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<StompFrame, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.store.dequeue(self.destination) {
            Ok(frame) => frame.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Opens the store described by the `store` configuration section.
///
/// # Errors
///
/// Returns [`ConfigError`] (wrapped) if `sqlite` is selected without a path,
/// or [`StoreError`] if the database cannot be opened.
pub fn open_store(settings: &StoreSettings) -> crate::error::Result<Box<dyn QueueStore>> {
    match settings.backend {
        StoreBackend::Memory => {
            info!(backend = "memory", "opened queue store");
            Ok(Box::new(MemoryQueue::new()))
        }
        StoreBackend::Sqlite => {
            let path = settings.path.as_ref().ok_or_else(|| ConfigError::InvalidValue {
                field: "store.path".to_string(),
                value: String::new(),
                expected: "a database file path for the sqlite backend".to_string(),
            })?;
            let store = SqliteQueue::open(path)?;
            info!(backend = "sqlite", path = %path.display(), "opened queue store");
            Ok(Box::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coilmq_core::Command;

    fn msg(n: u32) -> StompFrame {
        StompFrame::new(Command::Message).with_header("n", n.to_string())
    }

    #[test]
    fn frames_drains_destination() {
        let mut store = MemoryQueue::new();
        for n in 0..3 {
            store.enqueue("/queue/a", msg(n)).unwrap();
        }
        store.enqueue("/queue/b", msg(9)).unwrap();

        let drained: Vec<_> = Frames::new(&mut store, "/queue/a")
            .map(|f| f.unwrap().header("n").unwrap().to_string())
            .collect();
        assert_eq!(drained, ["0", "1", "2"]);
        assert_eq!(store.size("/queue/a").unwrap(), 0);
        assert_eq!(store.size("/queue/b").unwrap(), 1);
    }

    #[test]
    fn open_memory_store() {
        let store = open_store(&StoreSettings::default()).unwrap();
        assert!(store.destinations().unwrap().is_empty());
    }

    #[test]
    fn open_sqlite_requires_path() {
        let settings = StoreSettings {
            backend: StoreBackend::Sqlite,
            path: None,
        };
        let err = open_store(&settings).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreSettings {
            backend: StoreBackend::Sqlite,
            path: Some(dir.path().join("queues.db")),
        };
        let mut store = open_store(&settings).unwrap();
        store.enqueue("/queue/a", msg(1)).unwrap();
        assert!(store.has_frames("/queue/a").unwrap());
        store.close().unwrap();
    }
}
