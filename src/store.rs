//! Store Adapter (spec.md §4.D, §6 persisted state).
//!
//! The original treats the relational engine as opaque: open a database
//! file, run an `exec`, run a couple of prepared inserts. `librecast`
//! exposes the same narrow surface over `rusqlite`, rather than letting
//! SQL leak into `Context`/`Channel`/the receive loop. Schema creation is
//! idempotent (`CREATE TABLE IF NOT EXISTS`) the same way the original's
//! startup path re-runs its `CREATE TABLE` statements unconditionally.
//!
//! Integers wider than SQLite's native signed 64-bit range (`seq`, `rnd`
//! are unsigned 64-bit) are persisted as decimal text, and `src`/`dst` are
//! persisted as their IPv6 textual form — both per spec.md §6.

use std::net::Ipv6Addr;
use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::logging::{debug, trace, Logger};

/// A row in the per-channel message log.
pub struct LogEntry<'a> {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub seq: u64,
    pub rnd: u64,
    pub channel: &'a str,
    pub msg: &'a [u8],
}

/// A row in the channel-scoped keyval table.
pub struct KeyvalEntry<'a> {
    pub src: Ipv6Addr,
    pub seq: u64,
    pub rnd: u64,
    pub channel: &'a str,
    pub k: &'a [u8],
    pub v: &'a [u8],
}

/// An open handle to the embedded store, the way `Context` holds a single
/// store handle for its lifetime.
pub struct Store {
    conn: Connection,
    log: Logger,
}

impl Store {
    /// Opens (creating if absent) the database file at `path` and ensures
    /// the schema exists.
    pub fn open(path: &Path, log: Logger) -> Result<Store> {
        trace!(log, "opening store"; "path" => %path.display());
        let conn = Connection::open(path).map_err(Error::DbOpen)?;
        let store = Store { conn, log };
        store.create_schema()?;
        Ok(store)
    }

    /// Opens a private in-memory database, used by tests and by callers
    /// that don't want a file on disk.
    pub fn open_in_memory(log: Logger) -> Result<Store> {
        let conn = Connection::open_in_memory().map_err(Error::DbOpen)?;
        let store = Store { conn, log };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        debug!(self.log, "creating schema");
        self.exec(
            "CREATE TABLE IF NOT EXISTS keyval (
                src  TEXT NOT NULL,
                seq  TEXT NOT NULL,
                rnd  TEXT NOT NULL,
                k    TEXT UNIQUE,
                v    TEXT
            )",
        )?;
        self.exec(
            "CREATE TABLE IF NOT EXISTS keyval_channel (
                src     TEXT NOT NULL,
                seq     TEXT NOT NULL,
                rnd     TEXT NOT NULL,
                channel TEXT NOT NULL,
                k       TEXT NOT NULL,
                v       TEXT
            )",
        )?;
        self.exec(
            "CREATE UNIQUE INDEX IF NOT EXISTS keyval_channel_channel_k
             ON keyval_channel (channel, k)",
        )?;
        self.exec(
            "CREATE TABLE IF NOT EXISTS message (
                id      INTEGER PRIMARY KEY DESC,
                src     TEXT NOT NULL,
                dst     TEXT NOT NULL,
                seq     TEXT NOT NULL,
                rnd     TEXT NOT NULL,
                channel TEXT NOT NULL,
                msg     TEXT
            )",
        )?;
        Ok(())
    }

    /// Runs a side-effecting statement with no parameters.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.conn.execute(sql, []).map_err(Error::DbExec)?;
        Ok(())
    }

    /// Inserts one row into the message log, autocommitted. `msg` is
    /// bound as text, the way the original binds it with
    /// `sqlite3_bind_text` rather than as a blob.
    pub fn insert_message(&self, entry: &LogEntry<'_>) -> Result<()> {
        trace!(self.log, "insert message"; "channel" => entry.channel, "seq" => entry.seq);
        self.conn
            .execute(
                "INSERT INTO message (src, dst, seq, rnd, channel, msg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.src.to_string(),
                    entry.dst.to_string(),
                    entry.seq.to_string(),
                    entry.rnd.to_string(),
                    entry.channel,
                    String::from_utf8_lossy(entry.msg).into_owned(),
                ],
            )
            .map_err(Error::DbExec)?;
        Ok(())
    }

    /// Upserts one row into the channel-scoped keyval table, keyed on
    /// `(channel, k)`.
    pub fn insert_keyval_channel(&self, entry: &KeyvalEntry<'_>) -> Result<()> {
        trace!(self.log, "insert keyval"; "channel" => entry.channel);
        self.conn
            .execute(
                "INSERT INTO keyval_channel (src, seq, rnd, channel, k, v)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (channel, k) DO UPDATE SET
                    src = excluded.src,
                    seq = excluded.seq,
                    rnd = excluded.rnd,
                    v = excluded.v",
                params![
                    entry.src.to_string(),
                    entry.seq.to_string(),
                    entry.rnd.to_string(),
                    entry.channel,
                    entry.k,
                    entry.v,
                ],
            )
            .map_err(Error::DbExec)?;
        Ok(())
    }

    /// Number of rows in `message`, used by tests to assert logging took
    /// place without reaching into the connection directly.
    #[cfg(test)]
    pub fn message_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
            .map_err(Error::DbExec)
    }

    #[cfg(test)]
    pub fn message_text(&self, channel: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT msg FROM message WHERE channel = ?1 ORDER BY id DESC LIMIT 1",
                params![channel],
                |row| row.get(0),
            )
            .map_err(Error::DbExec)
    }

    #[cfg(test)]
    pub fn keyval_channel_value(&self, channel: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT v FROM keyval_channel WHERE channel = ?1 AND k = ?2",
                params![channel, key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::DbExec(other)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;

    fn test_store() -> Store {
        Store::open_in_memory(discard_logger()).unwrap()
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let store = test_store();
        store.create_schema().unwrap();
    }

    #[test]
    fn insert_message_is_counted() {
        let store = test_store();
        let entry = LogEntry {
            src: "fe80::1".parse().unwrap(),
            dst: "ff3e::1".parse().unwrap(),
            seq: 1,
            rnd: 2,
            channel: "chan",
            msg: b"hello",
        };
        store.insert_message(&entry).unwrap();
        assert_eq!(store.message_count().unwrap(), 1);
    }

    #[test]
    fn message_payload_is_stored_and_read_back_as_text() {
        let store = test_store();
        let entry = LogEntry {
            src: "fe80::1".parse().unwrap(),
            dst: "ff3e::1".parse().unwrap(),
            seq: 1,
            rnd: 2,
            channel: "chan",
            msg: b"hi",
        };
        store.insert_message(&entry).unwrap();
        assert_eq!(store.message_text("chan").unwrap(), "hi");
    }

    #[test]
    fn keyval_channel_is_unique_per_channel_and_key() {
        let store = test_store();
        let entry = KeyvalEntry {
            src: "fe80::1".parse().unwrap(),
            seq: 1,
            rnd: 2,
            channel: "chan",
            k: b"k",
            v: b"v1",
        };
        store.insert_keyval_channel(&entry).unwrap();
        let entry2 = KeyvalEntry { v: b"v2", ..entry };
        store.insert_keyval_channel(&entry2).unwrap();
        assert_eq!(
            store.keyval_channel_value("chan", b"k").unwrap(),
            Some(b"v2".to_vec())
        );
    }
}
