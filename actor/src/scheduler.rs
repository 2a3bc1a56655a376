// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cooperative task queue
//!
//! Work that must not run synchronously (mailbox drains triggered by notifications, retry
//! passes, rerender flushes) is queued as a [`Task`]. The runtime takes a snapshot of the
//! queue once per tick and runs it; anything queued while a tick runs belongs to the next
//! one. A task queued twice before the tick that runs it runs once.
//!

use crate::{ActorId, actor::lock};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Unit of deferred work.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    /// Drain the actor's mailbox.
    ProcessEvents(ActorId),
    /// Render every actor scheduled since the last flush.
    FlushRerenders,
}

#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    timers: AtomicUsize,
    notify: Notify,
}

impl TaskQueue {
    /// Queues `task` for the next tick.
    pub fn push(&self, task: Task) {
        {
            let mut tasks = lock(&self.tasks);
            if tasks.contains(&task) {
                return;
            }
            debug!("Queued {:?}.", task);
            tasks.push_back(task);
        }
        self.notify.notify_one();
    }

    /// Queues `task` once `delay` elapses, unless `cancel` fires first.
    ///
    /// A zero delay queues immediately.
    pub fn push_after(
        self: &Arc<Self>,
        task: Task,
        delay: Duration,
        cancel: CancellationToken,
    ) {
        if delay.is_zero() {
            self.push(task);
            return;
        }
        self.timers.fetch_add(1, Ordering::SeqCst);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.push(task),
            }
            queue.timers.fetch_sub(1, Ordering::SeqCst);
            queue.notify.notify_one();
        });
    }

    /// Takes every queued task.
    pub fn take(&self) -> Vec<Task> {
        lock(&self.tasks).drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Timers started by [`TaskQueue::push_after`] that have not fired or been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.timers.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        lock(&self.tasks).clear();
    }

    /// Completes after the next push or timer completion.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
