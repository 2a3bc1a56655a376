// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor lifecycle
//!
//! Creation, reuse and destruction of actors. Destruction is the only path that tears an
//! actor down, and it starts by removing the actor from the registry: any operation that
//! resumes afterwards finds the actor gone and does nothing.
//!

use crate::{
    ActorConfig, ActorId, AgentKey, ContainerId, Error,
    actor::{Actor, ActorHandle, Placement, RenderState},
    behavior::Behaviors,
    registry::Registry,
    render::{Renderer, ViewAttachment},
    rerender::RerenderScheduler,
    scheduler::{Task, TaskQueue},
    subscriber::MailboxSubscriber,
};

use store::{ChangeCallback, ContextStore, MailboxStore};
use tracing::{debug, error};

use std::sync::Arc;

/// Options for [`LifecycleManager::spawn_actor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Do not subscribe to the mailbox nor queue the initial drain.
    pub suppress_subscription: bool,
}

pub struct LifecycleManager {
    registry: Arc<Registry>,
    store: Arc<dyn MailboxStore>,
    contexts: Arc<dyn ContextStore>,
    behaviors: Behaviors,
    renderer: Arc<dyn Renderer>,
    subscriber: MailboxSubscriber,
    rerender: Arc<RerenderScheduler>,
    queue: Arc<TaskQueue>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        registry: Arc<Registry>,
        store: Arc<dyn MailboxStore>,
        contexts: Arc<dyn ContextStore>,
        behaviors: Behaviors,
        renderer: Arc<dyn Renderer>,
        subscriber: MailboxSubscriber,
        rerender: Arc<RerenderScheduler>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            registry,
            store,
            contexts,
            behaviors,
            renderer,
            subscriber,
            rerender,
            queue,
        }
    }

    /// Creates a headless actor, or returns the live one with the same id.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the behaviour or the inbox is missing, or no engine runs the
    ///   behaviour kind.
    /// - `Error::Resolution` if a reference can not be resolved.
    /// - Any error of the behaviour engine while creating the machine.
    pub async fn spawn_actor(
        &self,
        config: ActorConfig,
        options: SpawnOptions,
    ) -> Result<Arc<Actor>, Error> {
        self.spawn(config, options).await.map(|(actor, _)| actor)
    }

    /// Spawns the actor. The flag is false when a live actor was returned instead.
    async fn spawn(
        &self,
        config: ActorConfig,
        options: SpawnOptions,
    ) -> Result<(Arc<Actor>, bool), Error> {
        if let Some(actor) = self.registry.get(&config.id) {
            return Ok((actor, false));
        }

        let behavior = config
            .behavior
            .clone()
            .filter(|behavior| !behavior.reference().is_empty())
            .ok_or_else(|| {
                Error::Config(config.id.clone(), "missing behavior".to_owned())
            })?;
        let inbox = config.inbox_ref();
        if inbox.is_empty() {
            return Err(Error::Config(config.id.clone(), "missing inbox".to_owned()));
        }
        let engine = self.behaviors.engine(&config.id, &behavior)?;

        let mailbox = self.store.resolve(&inbox).await?;
        let definition = self.store.resolve(behavior.reference()).await?;
        let context = match &config.context {
            Some(context) => Some(self.store.resolve(context).await?),
            None => None,
        };

        if let Some(actor) = self.registry.get(&config.id) {
            return Ok((actor, false));
        }
        let handle = ActorHandle::new(config.id.clone(), context);
        let machine = engine.create_machine(&definition, handle.clone()).await?;
        let actor = Actor::new(config, mailbox, definition, engine.clone(), machine, handle);

        let actor = match self.registry.insert(Arc::new(actor)) {
            Ok(actor) => actor,
            Err(existing) => {
                if let Err(e) = engine.destroy_machine(machine).await {
                    error!("Can not destroy duplicate machine of {}: {}", existing.id(), e);
                }
                return Ok((existing, false));
            }
        };

        if let Err(e) = self.wire(&actor, options) {
            self.destroy_actor(actor.id()).await;
            return Err(e);
        }
        debug!("Actor {} spawned on {}.", actor.id(), actor.mailbox());
        Ok((actor, true))
    }

    /// Creates a view actor in `container`, or moves the live one there.
    ///
    /// An actor spawned by this call is destroyed again if its view can not be attached or
    /// rendered.
    pub async fn create_actor(
        &self,
        config: ActorConfig,
        container: ContainerId,
        agent: Option<AgentKey>,
    ) -> Result<Arc<Actor>, Error> {
        if self.registry.contains(&config.id) {
            return self.reuse_actor(&config.id, container, agent).await;
        }
        let (actor, spawned) = self.spawn(config, SpawnOptions::default()).await?;
        if let Err(e) = self.attach(&actor, container, agent).await {
            if spawned {
                self.destroy_actor(actor.id()).await;
            }
            return Err(e);
        }
        Ok(actor)
    }

    /// Moves a live actor to `container`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the actor is not live.
    pub async fn reuse_actor(
        &self,
        id: &ActorId,
        container: ContainerId,
        agent: Option<AgentKey>,
    ) -> Result<Arc<Actor>, Error> {
        let actor = self
            .registry
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        self.attach(&actor, container, agent).await?;
        Ok(actor)
    }

    /// Tears down the actor and its children. Returns false if it was not live.
    pub async fn destroy_actor(&self, id: &ActorId) -> bool {
        let Some(root) = self.registry.remove(id) else {
            return false;
        };
        let mut stack = vec![root];
        while let Some(actor) = stack.pop() {
            for child in actor.children() {
                if let Some(child) = self.registry.remove(&child) {
                    stack.push(child);
                }
            }
            self.teardown(&actor).await;
        }
        true
    }

    /// Child actor for `slot`, created from the parent's configuration on first use.
    ///
    /// View children are created in the parent's container when the parent has one.
    pub async fn child(&self, parent: &ActorId, slot: &str) -> Result<Arc<Actor>, Error> {
        let owner = self
            .registry
            .get(parent)
            .ok_or_else(|| Error::NotFound(parent.clone()))?;
        if let Some(child) = owner.child(slot).and_then(|id| self.registry.get(&id)) {
            return Ok(child);
        }

        let config = owner.config().children.get(slot).cloned().ok_or_else(|| {
            Error::Config(parent.clone(), format!("no child in slot {}", slot))
        })?;
        let child = match (config.view.is_some(), owner.placement()) {
            (true, Some(placement)) => {
                self.create_actor(config, placement.container, placement.agent)
                    .await?
            }
            _ => self.spawn_actor(config, SpawnOptions::default()).await?,
        };

        if !self.registry.contains(parent) {
            self.destroy_actor(child.id()).await;
            return Err(Error::NotFound(parent.clone()));
        }
        owner.set_child(slot, child.id().clone());
        Ok(child)
    }

    fn wire(&self, actor: &Arc<Actor>, options: SpawnOptions) -> Result<(), Error> {
        if let Some(context) = actor.context() {
            let callback: ChangeCallback = {
                let actor = Arc::downgrade(actor);
                let rerender = Arc::downgrade(&self.rerender);
                Arc::new(move || {
                    let (Some(actor), Some(rerender)) = (actor.upgrade(), rerender.upgrade())
                    else {
                        return;
                    };
                    actor.mark_updating();
                    rerender.schedule_rerender(actor.id());
                })
            };
            let subscription = self.contexts.subscribe_context(context, callback)?;
            actor.push_unsubscribe(Box::new(move || subscription.unsubscribe()));
        }

        if !options.suppress_subscription {
            self.subscriber.attach(actor)?;
            self.queue.push(Task::ProcessEvents(actor.id().clone()));
        }
        Ok(())
    }

    async fn attach(
        &self,
        actor: &Arc<Actor>,
        container: ContainerId,
        agent: Option<AgentKey>,
    ) -> Result<(), Error> {
        let placement = Placement {
            container: container.clone(),
            agent: agent.clone(),
        };
        if !self.registry.place(actor, placement) {
            return Err(Error::NotFound(actor.id().clone()));
        }
        let Some(view) = actor.config().view.clone() else {
            return Ok(());
        };

        let fresh = actor.attach_surface();
        if fresh {
            actor.set_render_state(RenderState::Initializing);
        }
        let attached = self
            .renderer
            .attach_view(ViewAttachment {
                actor: actor.id().clone(),
                container,
                view,
                agent,
            })
            .await;
        if let Err(e) = attached {
            if fresh {
                actor.release_surface();
                actor.set_render_state(RenderState::Ready);
            }
            return Err(e);
        }
        if !self.registry.contains(actor.id()) {
            return Ok(());
        }

        if fresh || actor.restart_initial_render() {
            self.rerender.initial_render(actor).await
        } else {
            if actor.has_rendered() {
                self.rerender.schedule_rerender(actor.id());
            }
            Ok(())
        }
    }

    async fn teardown(&self, actor: &Actor) {
        self.rerender.forget(actor.id());
        for unsubscribe in actor.take_unsubscribes() {
            unsubscribe();
        }
        if actor.has_surface() {
            if let Err(e) = self.renderer.cleanup_actor(actor.id()).await {
                error!("Can not clean up surface of {}: {}", actor.id(), e);
            }
        }
        if let Some(machine) = actor.take_machine() {
            if let Err(e) = actor.engine().destroy_machine(machine).await {
                error!("Can not destroy machine of {}: {}", actor.id(), e);
            }
        }
        debug!("Actor {} destroyed.", actor.id());
    }
}
