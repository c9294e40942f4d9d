use std::fmt;
use std::path::Path;

use coilmq_core::StompFrame;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::QueueStore;
use crate::error::StoreError;

/// Durable store backed by a SQLite database.
///
/// Frames are persisted in wire encoding in a single table ordered by a
/// sequence column. Requeued frames take a sequence number below every
/// existing row so they are delivered first.
pub struct SqliteQueue {
    conn: Option<Connection>,
}

impl SqliteQueue {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS frames (
                seq INTEGER PRIMARY KEY,
                destination TEXT NOT NULL,
                frame BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_frames_destination ON frames(destination, seq);
            ",
        )?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }
}

impl fmt::Debug for SqliteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteQueue")
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl QueueStore for SqliteQueue {
    fn enqueue(&mut self, destination: &str, frame: StompFrame) -> Result<(), StoreError> {
        let encoded = frame.to_bytes();
        self.conn()?.execute(
            "INSERT INTO frames (destination, frame) VALUES (?1, ?2)",
            params![destination, &encoded[..]],
        )?;
        Ok(())
    }

    fn dequeue(&mut self, destination: &str) -> Result<Option<StompFrame>, StoreError> {
        let blob: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "DELETE FROM frames WHERE seq = (
                     SELECT seq FROM frames WHERE destination = ?1 ORDER BY seq LIMIT 1
                 ) RETURNING frame",
                params![destination],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(bytes) => Ok(Some(StompFrame::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn requeue(&mut self, destination: &str, frame: StompFrame) -> Result<(), StoreError> {
        let encoded = frame.to_bytes();
        self.conn()?.execute(
            "INSERT INTO frames (seq, destination, frame)
             VALUES ((SELECT COALESCE(MIN(seq), 1) - 1 FROM frames), ?1, ?2)",
            params![destination, &encoded[..]],
        )?;
        Ok(())
    }

    fn size(&self, destination: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM frames WHERE destination = ?1",
            params![destination],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn destinations(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT destination FROM frames ORDER BY destination")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
            debug!("closed sqlite queue store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coilmq_core::Command;

    fn msg(body: &'static str) -> StompFrame {
        StompFrame::new(Command::Message)
            .with_header("destination", "/queue/a")
            .with_body(body)
    }

    #[test]
    fn fifo_with_requeue_first() {
        let mut store = SqliteQueue::in_memory().unwrap();
        store.enqueue("/queue/a", msg("1")).unwrap();
        store.enqueue("/queue/a", msg("2")).unwrap();
        store.requeue("/queue/a", msg("0")).unwrap();

        assert_eq!(store.size("/queue/a").unwrap(), 3);
        for expected in [b"0", b"1", b"2"] {
            let frame = store.dequeue("/queue/a").unwrap().unwrap();
            assert_eq!(&frame.body[..], expected);
        }
        assert!(store.dequeue("/queue/a").unwrap().is_none());
    }

    #[test]
    fn frames_keep_headers_and_binary_bodies() {
        let mut store = SqliteQueue::in_memory().unwrap();
        let frame = StompFrame::new(Command::Message)
            .with_header("destination", "/queue/bin")
            .with_header("message-id", "abc")
            .with_body(vec![0u8, 1, 2, 0, 255]);
        store.enqueue("/queue/bin", frame.clone()).unwrap();

        let got = store.dequeue("/queue/bin").unwrap().unwrap();
        assert_eq!(got.message_id(), Some("abc"));
        assert_eq!(got.body, frame.body);
    }

    #[test]
    fn destinations_lists_non_empty_queues() {
        let mut store = SqliteQueue::in_memory().unwrap();
        store.enqueue("/queue/b", msg("1")).unwrap();
        store.enqueue("/queue/a", msg("1")).unwrap();
        store.enqueue("/queue/a", msg("2")).unwrap();
        assert_eq!(store.destinations().unwrap(), ["/queue/a", "/queue/b"]);

        store.dequeue("/queue/b").unwrap();
        assert_eq!(store.destinations().unwrap(), ["/queue/a"]);
    }

    #[test]
    fn frames_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queues.db");

        let mut store = SqliteQueue::open(&path).unwrap();
        store.enqueue("/queue/a", msg("persisted")).unwrap();
        store.close().unwrap();

        let mut store = SqliteQueue::open(&path).unwrap();
        let frame = store.dequeue("/queue/a").unwrap().unwrap();
        assert_eq!(&frame.body[..], b"persisted");
    }

    #[test]
    fn closed_store_rejects_operations() {
        let mut store = SqliteQueue::in_memory().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.enqueue("/queue/a", msg("x")),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.size("/queue/a"), Err(StoreError::Closed)));
        // Closing twice is harmless.
        store.close().unwrap();
    }
}
