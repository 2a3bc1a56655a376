// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox Storage Abstraction
//!
//! This module defines the storage contracts the actor runtime consumes:
//!
//! - **[`MailboxStore`]**: a durable, subscribable append log per actor. Every entry is a
//!   [`Message`] envelope whose `processed` flag lives on the entry itself; there is no
//!   separate inbox index.
//! - **[`ContextStore`]**: subscribable reads of actor-owned data. Actors hold a handle to a
//!   context, never the source of truth.
//!
//! Both contracts notify subscribers through plain callbacks ([`ChangeCallback`]). Callbacks
//! are always invoked after the change is visible to readers and without any store lock
//! held, so a callback may call back into the store.
//!
//! ## Reference Resolution
//!
//! Configuration refers to mailboxes, behaviours and contexts by reference. A reference that
//! starts with `@` is symbolic and resolves through the alias table; any other non-empty
//! reference is already a concrete identifier and resolves to itself.
//!
//! ## Testing Your Implementation
//!
//! ```ignore
//! #[cfg(test)]
//! mod tests {
//!     use store::test_mailbox_store;
//!
//!     test_mailbox_store! {
//!         my_backend_conformance: MyMailboxStore::default()
//!     }
//! }
//! ```

use crate::error::Error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

/// Prefix that marks a reference as symbolic.
pub const SYMBOLIC_PREFIX: char = '@';

/// Identifier assigned by a mailbox store when a message is pushed.
///
/// The identifier is stable for the lifetime of the entry and never reused, which makes it
/// suitable as an idempotency key for downstream handlers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Builds the identifier for the `sequence`-th entry of `mailbox`.
    pub fn new(mailbox: &str, sequence: u64) -> Self {
        MessageId(format!("{}:{:020}", mailbox, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId(value.to_owned())
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message envelope.
///
/// Immutable once pushed, except for `processed`, which transitions from `false` to `true`
/// exactly once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store identifier. `None` until the envelope has been pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Message type, checked against the target's declared interface.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    /// Sending actor, if any.
    #[serde(default)]
    pub source: Option<String>,
    /// Receiving actor.
    pub target: String,
    #[serde(default)]
    pub processed: bool,
}

impl Message {
    /// Creates an unsent, unprocessed envelope.
    pub fn new(
        kind: &str,
        payload: Value,
        source: Option<&str>,
        target: &str,
    ) -> Self {
        Self {
            id: None,
            kind: kind.to_owned(),
            payload,
            source: source.map(str::to_owned),
            target: target.to_owned(),
            processed: false,
        }
    }
}

/// Callback invoked when a mailbox or context changes.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by a subscription.
///
/// Dropping the handle does not detach the callback; call [`Subscription::unsubscribe`].
/// Unsubscribing more than once is a no-op.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Detaches the callback from the store.
    pub fn unsubscribe(&self) {
        let cancel = match self.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// True until [`Subscription::unsubscribe`] has been called.
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

/// Per-key callback registry shared by store implementations.
#[derive(Default)]
pub struct Watchers {
    next: AtomicU64,
    callbacks: Mutex<HashMap<String, BTreeMap<u64, ChangeCallback>>>,
}

impl Watchers {
    /// Registers `callback` for changes of `key`.
    pub fn watch(
        self: &Arc<Self>,
        key: &str,
        callback: ChangeCallback,
    ) -> Result<Subscription, Error> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        {
            let mut callbacks = self.callbacks.lock().map_err(|e| {
                Error::Store(format!("Can not lock watchers: {}", e))
            })?;
            callbacks
                .entry(key.to_owned())
                .or_default()
                .insert(id, callback);
        }
        debug!("Watching {} (subscription {}).", key, id);

        let watchers = Arc::downgrade(self);
        let key = key.to_owned();
        Ok(Subscription::new(move || {
            let Some(watchers) = watchers.upgrade() else {
                return;
            };
            if let Ok(mut callbacks) = watchers.callbacks.lock() {
                if let Some(entry) = callbacks.get_mut(&key) {
                    entry.remove(&id);
                    if entry.is_empty() {
                        callbacks.remove(&key);
                    }
                }
            };
        }))
    }

    /// Invokes every callback registered for `key`.
    ///
    /// The callbacks are cloned out of the registry first so they run without the lock.
    pub fn notify(&self, key: &str) {
        let callbacks: Vec<ChangeCallback> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks
                .get(key)
                .map(|entry| entry.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Number of callbacks currently registered for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.callbacks
            .lock()
            .map(|callbacks| callbacks.get(key).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

/// Resolves `reference` against an alias table.
pub fn resolve_reference(
    aliases: &HashMap<String, String>,
    reference: &str,
) -> Result<String, Error> {
    if reference.is_empty() {
        return Err(Error::Unresolved("empty reference".to_owned()));
    }
    if let Some(concrete) = aliases.get(reference) {
        return Ok(concrete.clone());
    }
    if reference.starts_with(SYMBOLIC_PREFIX) {
        return Err(Error::Unresolved(reference.to_owned()));
    }
    Ok(reference.to_owned())
}

/// Durable, subscribable append log, one per actor.
#[async_trait]
pub trait MailboxStore: Send + Sync + 'static {
    /// Appends `message` to `mailbox` with `processed = false` and notifies subscribers.
    async fn push(
        &self,
        mailbox: &str,
        message: Message,
    ) -> Result<MessageId, Error>;

    /// Snapshot of the unprocessed messages of `mailbox` addressed to `actor`, in mailbox
    /// order.
    async fn drain_unprocessed(
        &self,
        actor: &str,
        mailbox: &str,
    ) -> Result<Vec<Message>, Error>;

    /// Marks a message processed. Marking an already processed message is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::EntryNotFound` if no message has this id.
    async fn mark_processed(&self, id: &MessageId) -> Result<(), Error>;

    /// Registers `on_change` to be called after every push to `mailbox`.
    fn subscribe(
        &self,
        mailbox: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, Error>;

    /// Resolves a symbolic or concrete reference to a concrete store identifier.
    async fn resolve(&self, reference: &str) -> Result<String, Error>;

    /// Binds the symbolic reference `symbol` to `concrete`.
    fn register_alias(&self, symbol: &str, concrete: &str) -> Result<(), Error>;

    /// Full log of `mailbox`, processed entries included.
    async fn messages(&self, mailbox: &str) -> Result<Vec<Message>, Error>;
}

/// Subscribable reactive reads of actor-owned data.
#[async_trait]
pub trait ContextStore: Send + Sync + 'static {
    /// Current value of `context`, `Value::Null` if it was never written.
    async fn read_context(&self, context: &str) -> Result<Value, Error>;

    /// Replaces the value of `context` and notifies subscribers.
    async fn write_context(&self, context: &str, value: Value)
    -> Result<(), Error>;

    fn subscribe_context(
        &self,
        context: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, Error>;
}

/// Conformance tests for [`MailboxStore`] implementations.
///
/// The factory expression is evaluated once per test and must produce a fresh, empty store.
#[macro_export]
macro_rules! test_mailbox_store {
    ($name:ident: $factory:expr) => {
        #[cfg(test)]
        mod $name {
            use super::*;
            use $crate::error::Error;
            use $crate::mailbox::{MailboxStore, Message, MessageId};

            use std::sync::{
                Arc,
                atomic::{AtomicUsize, Ordering},
            };

            fn message(kind: &str) -> Message {
                Message::new(kind, serde_json::json!({}), Some("src"), "actor")
            }

            #[tokio::test]
            async fn test_push_assigns_ids_in_order() {
                let store = $factory;
                let first = store.push("inbox", message("A")).await.unwrap();
                let second = store.push("inbox", message("B")).await.unwrap();
                assert!(first < second);
                let log = store.messages("inbox").await.unwrap();
                assert_eq!(log.len(), 2);
                assert_eq!(log[0].id, Some(first));
                assert_eq!(log[0].kind, "A");
                assert_eq!(log[1].kind, "B");
            }

            #[tokio::test]
            async fn test_push_forces_unprocessed() {
                let store = $factory;
                let mut msg = message("A");
                msg.processed = true;
                store.push("inbox", msg).await.unwrap();
                let pending =
                    store.drain_unprocessed("actor", "inbox").await.unwrap();
                assert_eq!(pending.len(), 1);
                assert!(!pending[0].processed);
            }

            #[tokio::test]
            async fn test_drain_skips_processed_and_other_targets() {
                let store = $factory;
                let first = store.push("inbox", message("A")).await.unwrap();
                store.push("inbox", message("B")).await.unwrap();
                store
                    .push(
                        "inbox",
                        Message::new("C", serde_json::json!(1), None, "other"),
                    )
                    .await
                    .unwrap();
                store.mark_processed(&first).await.unwrap();
                let pending =
                    store.drain_unprocessed("actor", "inbox").await.unwrap();
                let kinds: Vec<&str> =
                    pending.iter().map(|m| m.kind.as_str()).collect();
                assert_eq!(kinds, vec!["B"]);
            }

            #[tokio::test]
            async fn test_mark_processed_is_idempotent() {
                let store = $factory;
                let id = store.push("inbox", message("A")).await.unwrap();
                store.mark_processed(&id).await.unwrap();
                store.mark_processed(&id).await.unwrap();
                let log = store.messages("inbox").await.unwrap();
                assert!(log[0].processed);
            }

            #[tokio::test]
            async fn test_mark_processed_unknown() {
                let store = $factory;
                let result =
                    store.mark_processed(&MessageId::from("missing")).await;
                assert!(matches!(result, Err(Error::EntryNotFound(_))));
            }

            #[tokio::test]
            async fn test_subscribe_and_unsubscribe() {
                let store = $factory;
                let calls = Arc::new(AtomicUsize::new(0));
                let counter = calls.clone();
                let subscription = store
                    .subscribe(
                        "inbox",
                        Arc::new(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }),
                    )
                    .unwrap();
                store.push("inbox", message("A")).await.unwrap();
                store.push("other", message("B")).await.unwrap();
                assert_eq!(calls.load(Ordering::SeqCst), 1);
                subscription.unsubscribe();
                subscription.unsubscribe();
                store.push("inbox", message("C")).await.unwrap();
                assert_eq!(calls.load(Ordering::SeqCst), 1);
                assert!(!subscription.is_active());
            }

            #[tokio::test]
            async fn test_resolve() {
                let store = $factory;
                assert_eq!(store.resolve("inbox-1").await.unwrap(), "inbox-1");
                assert!(matches!(
                    store.resolve("@main").await,
                    Err(Error::Unresolved(_))
                ));
                store.register_alias("@main", "inbox-1").unwrap();
                assert_eq!(store.resolve("@main").await.unwrap(), "inbox-1");
                assert!(store.resolve("").await.is_err());
            }

            #[tokio::test]
            async fn test_empty_mailbox() {
                let store = $factory;
                assert!(store.messages("nothing").await.unwrap().is_empty());
                assert!(
                    store
                        .drain_unprocessed("actor", "nothing")
                        .await
                        .unwrap()
                        .is_empty()
                );
            }
        }
    };
}
