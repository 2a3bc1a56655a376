// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Memory store implementation.
//!

use crate::{
    error::Error,
    mailbox::{
        ChangeCallback, ContextStore, MailboxStore, Message, MessageId,
        Subscription, Watchers, resolve_reference,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

#[derive(Default)]
struct MemoryData {
    /// Sequence used for message ids. Shared by every mailbox so ids are never reused.
    sequence: u64,
    mailboxes: HashMap<String, Vec<Message>>,
    /// Message id -> (mailbox, position).
    locations: HashMap<MessageId, (String, usize)>,
    aliases: HashMap<String, String>,
    contexts: BTreeMap<String, Value>,
}

/// A mailbox and context store that keeps everything in memory.
///
/// Clones share the same data.
#[derive(Default, Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryData>>,
    mailbox_watchers: Arc<Watchers>,
    context_watchers: Arc<Watchers>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MailboxStore for MemoryStore {
    async fn push(
        &self,
        mailbox: &str,
        mut message: Message,
    ) -> Result<MessageId, Error> {
        let id = {
            let mut lock = self.data.write().map_err(|e| {
                Error::Store(format!("Can not lock data: {}", e))
            })?;
            lock.sequence += 1;
            let id = MessageId::new(mailbox, lock.sequence);
            message.id = Some(id.clone());
            message.processed = false;
            let log = lock.mailboxes.entry(mailbox.to_owned()).or_default();
            log.push(message);
            let position = log.len() - 1;
            lock.locations
                .insert(id.clone(), (mailbox.to_owned(), position));
            id
        };
        debug!("Pushed {} to mailbox {}.", id, mailbox);
        self.mailbox_watchers.notify(mailbox);
        Ok(id)
    }

    async fn drain_unprocessed(
        &self,
        actor: &str,
        mailbox: &str,
    ) -> Result<Vec<Message>, Error> {
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        Ok(lock
            .mailboxes
            .get(mailbox)
            .map(|log| {
                log.iter()
                    .filter(|message| !message.processed && message.target == actor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_processed(&self, id: &MessageId) -> Result<(), Error> {
        let mut lock = self
            .data
            .write()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        let Some((mailbox, position)) = lock.locations.get(id).cloned() else {
            return Err(Error::EntryNotFound(id.to_string()));
        };
        match lock
            .mailboxes
            .get_mut(&mailbox)
            .and_then(|log| log.get_mut(position))
        {
            Some(message) => {
                message.processed = true;
                Ok(())
            }
            None => Err(Error::EntryNotFound(id.to_string())),
        }
    }

    fn subscribe(
        &self,
        mailbox: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, Error> {
        self.mailbox_watchers.watch(mailbox, on_change)
    }

    async fn resolve(&self, reference: &str) -> Result<String, Error> {
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        resolve_reference(&lock.aliases, reference)
    }

    fn register_alias(&self, symbol: &str, concrete: &str) -> Result<(), Error> {
        let mut lock = self
            .data
            .write()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        lock.aliases.insert(symbol.to_owned(), concrete.to_owned());
        Ok(())
    }

    async fn messages(&self, mailbox: &str) -> Result<Vec<Message>, Error> {
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        Ok(lock.mailboxes.get(mailbox).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn read_context(&self, context: &str) -> Result<Value, Error> {
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Store(format!("Can not lock data: {}", e)))?;
        Ok(lock.contexts.get(context).cloned().unwrap_or(Value::Null))
    }

    async fn write_context(
        &self,
        context: &str,
        value: Value,
    ) -> Result<(), Error> {
        {
            let mut lock = self.data.write().map_err(|e| {
                Error::Store(format!("Can not lock data: {}", e))
            })?;
            lock.contexts.insert(context.to_owned(), value);
        }
        self.context_watchers.notify(context);
        Ok(())
    }

    fn subscribe_context(
        &self,
        context: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, Error> {
        self.context_watchers.watch(context, on_change)
    }
}
