// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rerender scheduling
//!
//! Rerender requests are collected in a pending set and rendered by a single queued flush,
//! so any number of requests for one actor within one tick produce one render.
//!

use crate::{
    ActorId, Error,
    actor::{Actor, RenderState, lock},
    registry::Registry,
    render::{RenderRequest, Renderer, StyleEngine},
    scheduler::{Task, TaskQueue},
};

use futures::future::join_all;
use serde_json::Value;
use store::ContextStore;
use tracing::{debug, warn};

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

pub struct RerenderScheduler {
    registry: Arc<Registry>,
    queue: Arc<TaskQueue>,
    renderer: Arc<dyn Renderer>,
    styles: Arc<dyn StyleEngine>,
    contexts: Arc<dyn ContextStore>,
    pending: Mutex<BTreeSet<ActorId>>,
    flush_scheduled: AtomicBool,
}

impl RerenderScheduler {
    pub(crate) fn new(
        registry: Arc<Registry>,
        queue: Arc<TaskQueue>,
        renderer: Arc<dyn Renderer>,
        styles: Arc<dyn StyleEngine>,
        contexts: Arc<dyn ContextStore>,
    ) -> Self {
        Self {
            registry,
            queue,
            renderer,
            styles,
            contexts,
            pending: Mutex::new(BTreeSet::new()),
            flush_scheduled: AtomicBool::new(false),
        }
    }

    /// Adds `id` to the next flush. Ignored for actors that are not live.
    pub fn schedule_rerender(&self, id: &ActorId) {
        if !self.registry.contains(id) {
            return;
        }
        lock(&self.pending).insert(id.clone());
        if !self.flush_scheduled.swap(true, Ordering::SeqCst) {
            self.queue.push(Task::FlushRerenders);
        }
    }

    /// Renders every actor scheduled since the previous flush, concurrently.
    pub async fn flush_rerenders(&self) {
        self.flush_scheduled.store(false, Ordering::SeqCst);
        let pending = std::mem::take(&mut *lock(&self.pending));
        let actors: Vec<Arc<Actor>> = pending
            .iter()
            .filter_map(|id| self.registry.get(id))
            .collect();
        if actors.is_empty() {
            return;
        }
        debug!("Flushing {} rerenders.", actors.len());

        let results =
            join_all(actors.iter().map(|actor| self.rerender_actor(actor))).await;
        for (actor, result) in actors.iter().zip(results) {
            if let Err(e) = result {
                warn!("Rerender of {} failed: {}", actor.id(), e);
            }
        }
    }

    /// Renders one actor now if it is idle (`Ready` or `Updating`).
    pub async fn rerender(&self, id: &ActorId) -> Result<(), Error> {
        match self.registry.get(id) {
            Some(actor) => self.rerender_actor(&actor).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn rerender_actor(&self, actor: &Arc<Actor>) -> Result<(), Error> {
        if !matches!(
            actor.render_state(),
            RenderState::Ready | RenderState::Updating
        ) {
            return Ok(());
        }
        if !actor.has_surface() {
            actor.set_render_state(RenderState::Ready);
            return Ok(());
        }
        self.render(actor).await
    }

    /// First render of a freshly attached surface.
    pub(crate) async fn initial_render(
        &self,
        actor: &Arc<Actor>,
    ) -> Result<(), Error> {
        if actor.render_state() != RenderState::Initializing {
            return Ok(());
        }
        self.render(actor).await
    }

    /// Drops a pending request.
    pub(crate) fn forget(&self, id: &ActorId) {
        lock(&self.pending).remove(id);
    }

    pub(crate) fn clear(&self) {
        lock(&self.pending).clear();
        self.flush_scheduled.store(false, Ordering::SeqCst);
    }

    async fn render(&self, actor: &Arc<Actor>) -> Result<(), Error> {
        let Some(view) = actor.config().view.clone() else {
            actor.set_render_state(RenderState::Ready);
            return Ok(());
        };
        actor.set_render_state(RenderState::Rendering);

        let result = self.render_pass(actor, view).await;
        if self.registry.contains(actor.id()) {
            actor.set_render_state(RenderState::Ready);
            if result.is_ok() {
                actor.mark_rendered();
            }
        }
        result
    }

    async fn render_pass(&self, actor: &Arc<Actor>, view: String) -> Result<(), Error> {
        let styles = self
            .styles
            .compute(actor.id(), actor.config().style.as_deref())
            .await?;
        let context = match actor.context() {
            Some(context) => self.contexts.read_context(context).await?,
            None => Value::Null,
        };
        if !self.registry.contains(actor.id()) {
            return Ok(());
        }
        self.renderer
            .render(RenderRequest {
                actor: actor.id().clone(),
                view,
                context,
                styles,
            })
            .await
    }
}
