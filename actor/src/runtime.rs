// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor runtime
//!
//! The `runtime` module provides the [`ActorRuntime`] type, the composition root that owns
//! the registry, the task queue and every component, and the [`RuntimeRunner`] that drives
//! the queue until the runtime is cancelled.
//!

use crate::{
    ActorConfig, ActorId, AgentKey, ContainerId, Error, RuntimeConfig,
    actor::{Actor, Placement, RenderState},
    behavior::Behaviors,
    lifecycle::{LifecycleManager, SpawnOptions},
    processor::{DrainReport, MessageProcessor},
    registry::Registry,
    render::{NoStyles, Renderer, StyleEngine},
    rerender::RerenderScheduler,
    scheduler::{Task, TaskQueue},
    subscriber::MailboxSubscriber,
    validation::{SchemaValidator, ValidationPipeline},
};

use futures::future::join_all;
use serde_json::Value;
use store::{ContextStore, MailboxStore, Message, MessageId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use std::sync::Arc;

/// External collaborators of a runtime.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn MailboxStore>,
    pub contexts: Arc<dyn ContextStore>,
    pub behaviors: Behaviors,
    pub renderer: Arc<dyn Renderer>,
    pub styles: Arc<dyn StyleEngine>,
    pub validator: Arc<dyn SchemaValidator>,
}

impl Services {
    /// Services without style computation.
    pub fn new(
        store: Arc<dyn MailboxStore>,
        contexts: Arc<dyn ContextStore>,
        behaviors: Behaviors,
        renderer: Arc<dyn Renderer>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            store,
            contexts,
            behaviors,
            renderer,
            styles: Arc::new(NoStyles),
            validator,
        }
    }

    pub fn with_styles(mut self, styles: Arc<dyn StyleEngine>) -> Self {
        self.styles = styles;
        self
    }
}

/// Point-in-time view of a live actor.
#[derive(Clone, Debug, PartialEq)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub mailbox: String,
    pub behavior: String,
    pub context: Option<String>,
    pub render_state: RenderState,
    pub has_surface: bool,
    pub has_rendered: bool,
    pub placement: Option<Placement>,
    pub children: Vec<ActorId>,
    pub processing: bool,
    pub last_sender: Option<ActorId>,
}

impl From<&Actor> for ActorSnapshot {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.id().clone(),
            mailbox: actor.mailbox().to_owned(),
            behavior: actor.behavior().to_owned(),
            context: actor.context().map(str::to_owned),
            render_state: actor.render_state(),
            has_surface: actor.has_surface(),
            has_rendered: actor.has_rendered(),
            placement: actor.placement(),
            children: actor.children(),
            processing: actor.is_processing(),
            last_sender: actor.last_sender(),
        }
    }
}

/// Actor runtime.
///
/// Cloning is cheap; every clone drives the same runtime.
#[derive(Clone)]
pub struct ActorRuntime {
    config: RuntimeConfig,
    registry: Arc<Registry>,
    queue: Arc<TaskQueue>,
    store: Arc<dyn MailboxStore>,
    lifecycle: Arc<LifecycleManager>,
    processor: Arc<MessageProcessor>,
    rerender: Arc<RerenderScheduler>,
    token: CancellationToken,
}

impl ActorRuntime {
    /// Create a new actor runtime.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the runtime and the runner that drives its task queue.
    pub fn create(
        config: RuntimeConfig,
        services: Services,
        token: CancellationToken,
    ) -> (ActorRuntime, RuntimeRunner) {
        let registry = Arc::new(Registry::default());
        let queue = Arc::new(TaskQueue::default());

        let rerender = Arc::new(RerenderScheduler::new(
            registry.clone(),
            queue.clone(),
            services.renderer.clone(),
            services.styles.clone(),
            services.contexts.clone(),
        ));
        let subscriber = MailboxSubscriber::new(
            services.store.clone(),
            queue.clone(),
            config.debounce,
        );
        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            services.store.clone(),
            services.contexts.clone(),
            services.behaviors.clone(),
            services.renderer.clone(),
            subscriber,
            rerender.clone(),
            queue.clone(),
        ));
        let processor = Arc::new(MessageProcessor::new(
            registry.clone(),
            services.store.clone(),
            ValidationPipeline::new(services.validator.clone()),
            queue.clone(),
            config.retry_delay,
            token.clone(),
        ));

        let runtime = ActorRuntime {
            config,
            registry,
            queue,
            store: services.store,
            lifecycle,
            processor,
            rerender,
            token: token.clone(),
        };
        let runner = RuntimeRunner::new(runtime.clone(), token);
        (runtime, runner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Mailbox store the runtime delivers to.
    pub fn store(&self) -> &Arc<dyn MailboxStore> {
        &self.store
    }

    /// Makes `config` known, so that messages can be delivered to it before it is spawned.
    pub fn register(&self, config: ActorConfig) {
        debug!("Actor {} registered in catalog.", config.id);
        self.registry.register_config(config);
    }

    /// Creates a headless actor. See [`LifecycleManager::spawn_actor`].
    pub async fn spawn_actor(&self, config: ActorConfig) -> Result<ActorId, Error> {
        self.spawn_actor_with(config, SpawnOptions::default()).await
    }

    pub async fn spawn_actor_with(
        &self,
        config: ActorConfig,
        options: SpawnOptions,
    ) -> Result<ActorId, Error> {
        self.check_running()?;
        let actor = self.lifecycle.spawn_actor(config, options).await?;
        Ok(actor.id().clone())
    }

    /// Creates a view actor in `container`, or moves the live one there.
    pub async fn create_actor(
        &self,
        config: ActorConfig,
        container: ContainerId,
        agent: Option<AgentKey>,
    ) -> Result<ActorId, Error> {
        self.check_running()?;
        let actor = self.lifecycle.create_actor(config, container, agent).await?;
        Ok(actor.id().clone())
    }

    pub async fn reuse_actor(
        &self,
        id: &ActorId,
        container: ContainerId,
        agent: Option<AgentKey>,
    ) -> Result<(), Error> {
        self.lifecycle.reuse_actor(id, container, agent).await?;
        Ok(())
    }

    /// Destroys the actor and its children. Destroying an unknown actor does nothing.
    pub async fn destroy_actor(&self, id: &ActorId) -> bool {
        self.lifecycle.destroy_actor(id).await
    }

    /// Destroys every actor placed in `container`. Returns how many were destroyed.
    pub async fn destroy_actors_for_container(&self, container: &ContainerId) -> usize {
        self.destroy_all(self.registry.in_container(container)).await
    }

    /// Destroys every actor placed under `agent`. Returns how many were destroyed.
    pub async fn destroy_actors_for_agent(&self, agent: &AgentKey) -> usize {
        self.destroy_all(self.registry.for_agent(agent)).await
    }

    /// Child actor of `parent` for `slot`, created on first use.
    pub async fn child(&self, parent: &ActorId, slot: &str) -> Result<ActorId, Error> {
        let child = self.lifecycle.child(parent, slot).await?;
        Ok(child.id().clone())
    }

    /// Appends a message to the target's mailbox.
    ///
    /// A target that is registered but not live is spawned headless first.
    ///
    /// # Errors
    ///
    /// - `Error::UnresolvedExpression` if a string in the payload is still a template.
    /// - `Error::Resolution` naming the target if it can not be resolved or spawned.
    /// - `Error::Stopped` once the runtime is shut down.
    pub async fn deliver_event(
        &self,
        source: Option<&ActorId>,
        target: &ActorId,
        kind: &str,
        payload: Value,
    ) -> Result<MessageId, Error> {
        self.check_running()?;
        if let Some(expression) = unresolved_expression(&payload) {
            return Err(Error::UnresolvedExpression(expression.to_owned()));
        }

        let actor = match self.registry.get(target) {
            Some(actor) => actor,
            None => {
                let config = self.registry.config(target).ok_or_else(|| {
                    Error::Resolution(
                        target.to_string(),
                        "no actor or configuration registered".to_owned(),
                    )
                })?;
                self.lifecycle
                    .spawn_actor(config, SpawnOptions::default())
                    .await
                    .map_err(|e| Error::Resolution(target.to_string(), e.to_string()))?
            }
        };

        let message = Message::new(
            kind,
            payload,
            source.map(ActorId::as_str),
            target.as_str(),
        );
        let id = self.store.push(actor.mailbox(), message).await?;
        debug!("Delivered {} to {} as {}.", kind, target, id);
        Ok(id)
    }

    /// Runs one drain pass now. See [`MessageProcessor::process_events`].
    pub async fn process_events(&self, id: &ActorId) -> Result<Option<DrainReport>, Error> {
        self.processor.process_events(id).await
    }

    pub fn schedule_rerender(&self, id: &ActorId) {
        self.rerender.schedule_rerender(id);
    }

    pub async fn flush_rerenders(&self) {
        self.rerender.flush_rerenders().await;
    }

    /// Runs the tasks queued so far, concurrently. Tasks they queue wait for the next tick.
    ///
    /// # Returns
    ///
    /// The number of tasks run.
    pub async fn tick(&self) -> usize {
        let tasks = self.queue.take();
        let count = tasks.len();
        join_all(tasks.into_iter().map(|task| self.run_task(task))).await;
        count
    }

    /// Ticks until no task is queued and no timer is pending.
    pub async fn run_until_idle(&self) {
        loop {
            if self.queue.is_empty() {
                if self.queue.pending_timers() == 0 {
                    break;
                }
                self.queue.notified().await;
                continue;
            }
            self.tick().await;
        }
    }

    /// Stops the runtime: destroys every live actor and drops pending work.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let count = self.destroy_all(self.registry.ids()).await;
        self.queue.clear();
        self.rerender.clear();
        debug!("Actor runtime shut down, {} actors destroyed.", count);
    }

    /// Cancels the runtime token. The runner shuts the runtime down.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn actor(&self, id: &ActorId) -> Option<ActorSnapshot> {
        self.registry
            .get(id)
            .map(|actor| ActorSnapshot::from(actor.as_ref()))
    }

    pub fn is_live(&self, id: &ActorId) -> bool {
        self.registry.contains(id)
    }

    /// Ids of every live actor.
    pub fn actors(&self) -> Vec<ActorId> {
        self.registry.ids()
    }

    pub fn actors_in_container(&self, container: &ContainerId) -> Vec<ActorId> {
        self.registry.in_container(container)
    }

    pub fn actors_for_agent(&self, agent: &AgentKey) -> Vec<ActorId> {
        self.registry.for_agent(agent)
    }

    async fn run_task(&self, task: Task) {
        match task {
            Task::ProcessEvents(id) => {
                if let Err(e) = self.processor.process_events(&id).await {
                    warn!("Drain of {} failed: {}", id, e);
                }
            }
            Task::FlushRerenders => self.rerender.flush_rerenders().await,
        }
    }

    async fn destroy_all(&self, ids: Vec<ActorId>) -> usize {
        let mut count = 0;
        for id in ids {
            if self.lifecycle.destroy_actor(&id).await {
                count += 1;
            }
        }
        count
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            Err(Error::Stopped)
        } else {
            Ok(())
        }
    }
}

/// First string in `value` that is still a template expression (`{{..}}` or `$ref`).
fn unresolved_expression(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) if text.contains("{{") || text.starts_with('$') => {
            Some(text.as_str())
        }
        Value::Array(items) => items.iter().find_map(unresolved_expression),
        Value::Object(fields) => fields.values().find_map(unresolved_expression),
        _ => None,
    }
}

/// Drives the task queue of an [`ActorRuntime`].
pub struct RuntimeRunner {
    runtime: ActorRuntime,
    token: CancellationToken,
}

impl RuntimeRunner {
    pub(crate) fn new(runtime: ActorRuntime, token: CancellationToken) -> Self {
        Self { runtime, token }
    }

    /// Ticks whenever work is queued, until the token is cancelled; then shuts down.
    pub async fn run(&mut self) {
        debug!("Running actor runtime...");
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.runtime.queue.notified() => {
                    while !self.runtime.queue.is_empty() && !self.token.is_cancelled() {
                        self.runtime.tick().await;
                    }
                }
            }
        }
        debug!("Stopping actor runtime...");
        self.runtime.shutdown().await;
        debug!("Actor runtime stopped.");
    }
}
