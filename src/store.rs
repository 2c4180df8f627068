//! SQLite-backed store of named facts
//!
//! Every derived value is published as a named fact with a timestamp and an
//! acknowledged flag. Writes are last-write-wins upserts; the only fact the
//! interpreter ever reads back is the per-category `*.changed` watermark.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

use crate::error::NsLinkError;

/// A named fact's payload: timestamp, acknowledged flag, value
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub ts: i64,
    pub ack: bool,
    pub val: Value,
}

impl Fact {
    pub fn new(ts: i64, val: Value) -> Self {
        Fact { ts, ack: true, val }
    }
}

/// Sink and read-back source for named facts
pub trait FactStore {
    /// Publish a fact, replacing any previous value under the same name
    fn write(&self, name: &str, fact: Fact) -> Result<(), NsLinkError>;

    /// Read a fact back, `None` if it was never written
    fn read(&self, name: &str) -> Result<Option<Fact>, NsLinkError>;
}

/// SQLite database holding the fact table
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Create or open a database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, NsLinkError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests
    pub fn in_memory() -> Result<Self, NsLinkError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, NsLinkError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS facts (
                name TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                ack INTEGER NOT NULL,
                val TEXT NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }
}

impl FactStore for Storage {
    fn write(&self, name: &str, fact: Fact) -> Result<(), NsLinkError> {
        let val = serde_json::to_string(&fact.val)?;
        self.conn.execute(
            "INSERT INTO facts (name, ts, ack, val) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET ts = ?2, ack = ?3, val = ?4",
            params![name, fact.ts, fact.ack as i64, val],
        )?;
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Option<Fact>, NsLinkError> {
        let row = self
            .conn
            .query_row(
                "SELECT ts, ack, val FROM facts WHERE name = ?1",
                params![name],
                |row| {
                    let ts: i64 = row.get(0)?;
                    let ack: i64 = row.get(1)?;
                    let val: String = row.get(2)?;
                    Ok((ts, ack != 0, val))
                },
            )
            .optional()?;

        match row {
            Some((ts, ack, val)) => Ok(Some(Fact {
                ts,
                ack,
                val: serde_json::from_str(&val)?,
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_missing_fact() {
        let storage = Storage::in_memory().unwrap();
        assert!(storage.read("data.cage.changed").unwrap().is_none());
    }

    #[test]
    fn test_write_and_read_back() {
        let storage = Storage::in_memory().unwrap();
        storage
            .write("data.mgdl", Fact::new(1_564_565_804_977, json!(204)))
            .unwrap();

        let fact = storage.read("data.mgdl").unwrap().unwrap();
        assert_eq!(fact.ts, 1_564_565_804_977);
        assert!(fact.ack);
        assert_eq!(fact.val, json!(204));
    }

    #[test]
    fn test_last_write_wins() {
        let storage = Storage::in_memory().unwrap();
        storage.write("data.status", Fact::new(1, json!("normal"))).unwrap();
        storage.write("data.status", Fact::new(2, json!("suspended"))).unwrap();

        let fact = storage.read("data.status").unwrap().unwrap();
        assert_eq!(fact.ts, 2);
        assert_eq!(fact.val, json!("suspended"));
    }
}
