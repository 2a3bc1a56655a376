// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # SQLite mailbox backend.
//!
//! Durable [`MailboxStore`] implementation. Each mailbox is an append log in the `mailbox`
//! table; the processed flag lives on each row.
//!

use store::{
    Error,
    mailbox::{
        ChangeCallback, MailboxStore, Message, MessageId, Subscription,
        Watchers, resolve_reference,
    },
};

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

/// SQLite backed mailbox store.
///
/// # Storage Model
///
/// - **mailbox**: (sn INTEGER, mailbox TEXT, id TEXT, target TEXT, message TEXT,
///   processed INTEGER). `sn` is global and strictly increasing, so ordering by `sn` is
///   mailbox order.
/// - **aliases**: (symbol TEXT, concrete TEXT) for symbolic reference resolution.
///
/// Subscriptions are in-process only: a second process writing to the same file does not
/// wake this process's subscribers.
#[derive(Clone)]
pub struct SqliteMailboxStore {
    /// Thread-safe shared SQLite connection.
    conn: Arc<Mutex<Connection>>,
    watchers: Arc<Watchers>,
}

impl SqliteMailboxStore {
    /// Opens or creates `database.db` inside the directory `path`.
    ///
    /// # Errors
    ///
    /// Returns Error::CreateStore if:
    /// - The directory cannot be created
    /// - The SQLite connection cannot be opened
    /// - The tables cannot be created
    ///
    pub fn new(path: &str) -> Result<Self, Error> {
        info!("Creating SQLite mailbox store");
        if !Path::new(&path).exists() {
            info!("Path does not exist, creating it");
            fs::create_dir_all(path).map_err(|e| {
                Error::CreateStore(format!(
                    "fail SQLite create directory: {}",
                    e
                ))
            })?;
        }

        info!("Opening SQLite connection");
        let conn = open(format!("{}/database.db", path)).map_err(|e| {
            Error::CreateStore(format!("fail SQLite open connection: {}", e))
        })?;
        create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: Arc::new(Watchers::default()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|e| Error::Store(format!("sqlite open connection: {}", e)))
    }
}

fn create_tables(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS mailbox (
            sn INTEGER NOT NULL PRIMARY KEY,
            mailbox TEXT NOT NULL,
            id TEXT NOT NULL UNIQUE,
            target TEXT NOT NULL,
            message TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS mailbox_pending
            ON mailbox (mailbox, processed, sn);
        CREATE TABLE IF NOT EXISTS aliases (
            symbol TEXT NOT NULL PRIMARY KEY,
            concrete TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| Error::CreateStore(format!("fail SQLite create table: {}", e)))
}

fn decode(id: String, json: String, processed: bool) -> Result<Message, Error> {
    let mut message: Message = serde_json::from_str(&json)
        .map_err(|e| Error::Codec(format!("invalid stored message: {}", e)))?;
    message.id = Some(MessageId::from(id.as_str()));
    message.processed = processed;
    Ok(message)
}

fn query_messages(
    conn: &Connection,
    query: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Message>, Error> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| Error::Store(format!("sqlite prepare error: {}", e)))?;
    let mut rows = stmt
        .query(args)
        .map_err(|e| Error::Store(format!("sqlite query error: {}", e)))?;
    let mut messages = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| Error::Store(format!("sqlite row error: {}", e)))?
    {
        let id: String = row
            .get(0)
            .map_err(|e| Error::Store(format!("sqlite row error: {}", e)))?;
        let json: String = row
            .get(1)
            .map_err(|e| Error::Store(format!("sqlite row error: {}", e)))?;
        let processed: i64 = row
            .get(2)
            .map_err(|e| Error::Store(format!("sqlite row error: {}", e)))?;
        messages.push(decode(id, json, processed != 0)?);
    }
    Ok(messages)
}

#[async_trait]
impl MailboxStore for SqliteMailboxStore {
    async fn push(
        &self,
        mailbox: &str,
        mut message: Message,
    ) -> Result<MessageId, Error> {
        let id = {
            let conn = self.lock()?;
            let sn: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(sn), 0) + 1 FROM mailbox",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| Error::Store(format!("sqlite sequence error: {}", e)))?;
            let id = MessageId::new(mailbox, sn as u64);
            message.id = None;
            message.processed = false;
            let json = serde_json::to_string(&message).map_err(|e| {
                Error::Codec(format!("can not encode message: {}", e))
            })?;
            conn.execute(
                "INSERT INTO mailbox (sn, mailbox, id, target, message, processed) \
                VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![sn, mailbox, id.as_str(), message.target, json],
            )
            .map_err(|e| Error::Store(format!("sqlite insert error: {}", e)))?;
            id
        };
        debug!("Pushed {} to mailbox {}.", id, mailbox);
        self.watchers.notify(mailbox);
        Ok(id)
    }

    async fn drain_unprocessed(
        &self,
        actor: &str,
        mailbox: &str,
    ) -> Result<Vec<Message>, Error> {
        let conn = self.lock()?;
        query_messages(
            &conn,
            "SELECT id, message, processed FROM mailbox \
            WHERE mailbox = ?1 AND target = ?2 AND processed = 0 ORDER BY sn ASC",
            params![mailbox, actor],
        )
    }

    async fn mark_processed(&self, id: &MessageId) -> Result<(), Error> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT sn FROM mailbox WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Store(format!("sqlite query error: {}", e)))?;
        if found.is_none() {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        conn.execute(
            "UPDATE mailbox SET processed = 1 WHERE id = ?1",
            params![id.as_str()],
        )
        .map_err(|e| Error::Store(format!("sqlite update error: {}", e)))?;
        Ok(())
    }

    fn subscribe(
        &self,
        mailbox: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, Error> {
        self.watchers.watch(mailbox, on_change)
    }

    async fn resolve(&self, reference: &str) -> Result<String, Error> {
        let conn = self.lock()?;
        let concrete: Option<String> = conn
            .query_row(
                "SELECT concrete FROM aliases WHERE symbol = ?1",
                params![reference],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Store(format!("sqlite query error: {}", e)))?;
        let mut aliases = HashMap::new();
        if let Some(concrete) = concrete {
            aliases.insert(reference.to_owned(), concrete);
        }
        resolve_reference(&aliases, reference)
    }

    fn register_alias(&self, symbol: &str, concrete: &str) -> Result<(), Error> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO aliases (symbol, concrete) VALUES (?1, ?2)",
            params![symbol, concrete],
        )
        .map_err(|e| Error::Store(format!("sqlite insert error: {}", e)))?;
        Ok(())
    }

    async fn messages(&self, mailbox: &str) -> Result<Vec<Message>, Error> {
        let conn = self.lock()?;
        query_messages(
            &conn,
            "SELECT id, message, processed FROM mailbox \
            WHERE mailbox = ?1 ORDER BY sn ASC",
            params![mailbox],
        )
    }
}

/// Open a SQLite database connection.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    let path = path.as_ref();
    let flags =
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        Error::Store(format!("SQLite failed to open connection: {}", e))
    })?;

    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        ",
    )
    .map_err(|e| {
        Error::Store(format!("SQLite failed to execute batch: {}", e))
    })?;

    Ok(conn)
}
