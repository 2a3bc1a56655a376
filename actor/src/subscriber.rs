// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox subscription
//!
//! Bridges store notifications to drain passes. Every push restarts the actor's debounce
//! timer; when the window elapses without another push, one
//! [`Task::ProcessEvents`](crate::scheduler::Task) is queued.
//!

use crate::{
    Error,
    actor::{Actor, lock},
    scheduler::{Task, TaskQueue},
};

use store::{ChangeCallback, MailboxStore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

pub struct MailboxSubscriber {
    store: Arc<dyn MailboxStore>,
    queue: Arc<TaskQueue>,
    debounce: Duration,
}

impl MailboxSubscriber {
    pub(crate) fn new(
        store: Arc<dyn MailboxStore>,
        queue: Arc<TaskQueue>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            debounce,
        }
    }

    /// Subscribes to the actor's mailbox.
    ///
    /// The matching teardown (cancel the pending timer, then unsubscribe) is added to the
    /// actor's unsubscribe list.
    pub fn attach(&self, actor: &Actor) -> Result<(), Error> {
        let timer: Arc<Mutex<Option<CancellationToken>>> = Arc::default();

        let callback: ChangeCallback = {
            let id = actor.id().clone();
            let queue = self.queue.clone();
            let debounce = self.debounce;
            let timer = timer.clone();
            Arc::new(move || {
                let token = CancellationToken::new();
                if let Some(previous) = lock(&timer).replace(token.clone()) {
                    previous.cancel();
                }
                queue.push_after(Task::ProcessEvents(id.clone()), debounce, token);
            })
        };

        let subscription = self.store.subscribe(actor.mailbox(), callback)?;
        debug!("Actor {} subscribed to {}.", actor.id(), actor.mailbox());

        actor.push_unsubscribe(Box::new(move || {
            if let Some(token) = lock(&timer).take() {
                token.cancel();
            }
            subscription.unsubscribe();
        }));
        Ok(())
    }
}
