// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message processing
//!
//! A drain pass takes a snapshot of the actor's unprocessed messages and, in mailbox
//! order, validates, dispatches and marks each one processed. Rejected and failing
//! messages are consumed like any other; they never stall the mailbox.
//!
//! At most one pass per actor is in flight. A pass that saw an unhandled message, or that
//! finds new messages waiting once it is done, requeues another pass instead of recursing.
//!
//! A message the store refuses to mark is remembered as consumed: later passes only retry
//! the mark, never the dispatch, and it does not count as waiting.
//!

use crate::{
    ActorId, Error,
    actor::Actor,
    behavior::Dispatch,
    registry::Registry,
    scheduler::{Task, TaskQueue},
    validation::{INIT, ValidationPipeline},
};

use store::{MailboxStore, Message, MessageId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Outcome of one drain pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages marked processed.
    pub processed: usize,
    pub handled: usize,
    pub unhandled: usize,
    pub rejected: usize,
    /// Messages whose dispatch returned an error.
    pub failed: usize,
    /// Whether another pass was queued.
    pub retry: bool,
}

pub struct MessageProcessor {
    registry: Arc<Registry>,
    store: Arc<dyn MailboxStore>,
    pipeline: ValidationPipeline,
    queue: Arc<TaskQueue>,
    retry_delay: Duration,
    cancel: CancellationToken,
    /// Dispatched messages whose mark failed.
    unmarked: Mutex<HashSet<MessageId>>,
}

impl MessageProcessor {
    pub(crate) fn new(
        registry: Arc<Registry>,
        store: Arc<dyn MailboxStore>,
        pipeline: ValidationPipeline,
        queue: Arc<TaskQueue>,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            pipeline,
            queue,
            retry_delay,
            cancel,
            unmarked: Mutex::new(HashSet::new()),
        }
    }

    /// Drains the actor's mailbox.
    ///
    /// Returns `Ok(None)` without doing anything if the actor is not live or a pass is
    /// already in flight for it.
    ///
    /// # Errors
    ///
    /// Only store failures while reading the mailbox are returned; per-message failures are
    /// logged and counted in the report.
    pub async fn process_events(
        &self,
        id: &ActorId,
    ) -> Result<Option<DrainReport>, Error> {
        let Some(actor) = self.registry.get(id) else {
            return Ok(None);
        };
        if !actor.begin_processing() {
            debug!("Drain of {} already in flight.", id);
            return Ok(None);
        }
        let result = self.drain(&actor).await;
        actor.end_processing();

        let mut report = result?;
        // An unhandled message only warrants a retry once it left the mailbox.
        let unhandled = report.unhandled > 0 && report.processed > 0;
        if self.registry.contains(id)
            && (unhandled || self.has_waiting(&actor).await?)
        {
            report.retry = true;
            self.queue.push_after(
                Task::ProcessEvents(id.clone()),
                self.retry_delay,
                self.cancel.child_token(),
            );
        }
        debug!("Drain of {} finished: {:?}", id, report);
        Ok(Some(report))
    }

    async fn drain(&self, actor: &Arc<Actor>) -> Result<DrainReport, Error> {
        let messages = self
            .store
            .drain_unprocessed(actor.id().as_str(), actor.mailbox())
            .await?;
        let mut report = DrainReport::default();

        for message in messages {
            if message.kind == INIT {
                continue;
            }
            if !self.registry.contains(actor.id()) {
                debug!("Actor {} destroyed mid-drain.", actor.id());
                break;
            }
            let Some(id) = message.id.clone() else {
                warn!(
                    "Message {} for {} has no id, skipped.",
                    message.kind,
                    actor.id()
                );
                continue;
            };
            if self.is_unmarked(&id) {
                if self.store.mark_processed(&id).await.is_ok() {
                    self.forget_unmarked(&id);
                }
                continue;
            }

            match self.pipeline.validate(actor.config(), &message).await {
                Err(reason) => {
                    warn!(
                        "Message {} for {} rejected: {}",
                        message.kind,
                        actor.id(),
                        reason
                    );
                    report.rejected += 1;
                }
                Ok(validated) => {
                    let Some(machine) = actor.machine() else {
                        break;
                    };
                    actor.record_sender(message.source.as_deref().map(ActorId::from));
                    match actor
                        .engine()
                        .send(machine, &message.kind, validated.payload)
                        .await
                    {
                        Ok(Dispatch::Handled) => report.handled += 1,
                        Ok(Dispatch::Unhandled) => {
                            debug!(
                                "Message {} unhandled by {}.",
                                message.kind,
                                actor.id()
                            );
                            report.unhandled += 1;
                        }
                        Err(e) => {
                            warn!(
                                "Handler of {} failed on {}: {}",
                                actor.id(),
                                message.kind,
                                e
                            );
                            report.failed += 1;
                        }
                    }
                }
            }

            if let Err(e) = self.store.mark_processed(&id).await {
                warn!("Can not mark {} processed: {}", id, e);
                self.remember_unmarked(id);
                continue;
            }
            report.processed += 1;
        }
        Ok(report)
    }

    async fn has_waiting(&self, actor: &Actor) -> Result<bool, Error> {
        let waiting = self
            .store
            .drain_unprocessed(actor.id().as_str(), actor.mailbox())
            .await?;
        Ok(waiting.iter().any(|message| self.is_pending(message)))
    }

    /// Whether a pass would dispatch `message`.
    fn is_pending(&self, message: &Message) -> bool {
        message.kind != INIT
            && message.id.as_ref().is_some_and(|id| !self.is_unmarked(id))
    }

    fn is_unmarked(&self, id: &MessageId) -> bool {
        self.unmarked
            .lock()
            .map(|unmarked| unmarked.contains(id))
            .unwrap_or(false)
    }

    fn remember_unmarked(&self, id: MessageId) {
        if let Ok(mut unmarked) = self.unmarked.lock() {
            unmarked.insert(id);
        }
    }

    fn forget_unmarked(&self, id: &MessageId) {
        if let Ok(mut unmarked) = self.unmarked.lock() {
            unmarked.remove(id);
        }
    }
}
