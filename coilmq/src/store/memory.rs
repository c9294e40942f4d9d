use std::collections::{HashMap, VecDeque};

use coilmq_core::StompFrame;

use super::QueueStore;
use crate::error::StoreError;

/// Volatile store keeping one `VecDeque` per destination.
///
/// Frames are lost when the broker exits.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: HashMap<String, VecDeque<StompFrame>>,
}

impl MemoryQueue {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueue {
    fn enqueue(&mut self, destination: &str, frame: StompFrame) -> Result<(), StoreError> {
        self.queues
            .entry(destination.to_string())
            .or_default()
            .push_back(frame);
        Ok(())
    }

    fn dequeue(&mut self, destination: &str) -> Result<Option<StompFrame>, StoreError> {
        let Some(queue) = self.queues.get_mut(destination) else {
            return Ok(None);
        };
        let frame = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(destination);
        }
        Ok(frame)
    }

    fn requeue(&mut self, destination: &str, frame: StompFrame) -> Result<(), StoreError> {
        self.queues
            .entry(destination.to_string())
            .or_default()
            .push_front(frame);
        Ok(())
    }

    fn size(&self, destination: &str) -> Result<usize, StoreError> {
        Ok(self.queues.get(destination).map_or(0, VecDeque::len))
    }

    fn destinations(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coilmq_core::Command;

    fn msg(body: &'static str) -> StompFrame {
        StompFrame::new(Command::Message).with_body(body)
    }

    #[test]
    fn fifo_per_destination() {
        let mut store = MemoryQueue::new();
        store.enqueue("/queue/a", msg("1")).unwrap();
        store.enqueue("/queue/a", msg("2")).unwrap();
        store.enqueue("/queue/b", msg("x")).unwrap();

        assert_eq!(store.size("/queue/a").unwrap(), 2);
        assert_eq!(&store.dequeue("/queue/a").unwrap().unwrap().body[..], b"1");
        assert_eq!(&store.dequeue("/queue/a").unwrap().unwrap().body[..], b"2");
        assert!(store.dequeue("/queue/a").unwrap().is_none());
        assert!(store.has_frames("/queue/b").unwrap());
    }

    #[test]
    fn requeue_goes_first() {
        let mut store = MemoryQueue::new();
        store.enqueue("/queue/a", msg("later")).unwrap();
        store.requeue("/queue/a", msg("again")).unwrap();
        assert_eq!(&store.dequeue("/queue/a").unwrap().unwrap().body[..], b"again");
    }

    #[test]
    fn empty_destinations_are_forgotten() {
        let mut store = MemoryQueue::new();
        store.enqueue("/queue/b", msg("1")).unwrap();
        store.enqueue("/queue/a", msg("1")).unwrap();
        assert_eq!(store.destinations().unwrap(), ["/queue/a", "/queue/b"]);

        store.dequeue("/queue/a").unwrap();
        assert_eq!(store.destinations().unwrap(), ["/queue/b"]);
        assert!(!store.has_frames("/queue/a").unwrap());
    }

    #[test]
    fn unknown_destination_is_empty() {
        let mut store = MemoryQueue::new();
        assert_eq!(store.size("/queue/none").unwrap(), 0);
        assert!(store.dequeue("/queue/none").unwrap().is_none());
    }
}
