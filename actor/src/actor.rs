// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor instances
//!
//! An [`Actor`] is the runtime side of an [`ActorConfig`]: its resolved mailbox and context,
//! the behaviour machine it owns, its render state and the teardown callbacks that must
//! run when it is destroyed.
//!
//! The configuration and resolved identifiers never change after spawn. The remaining
//! fields are bookkeeping owned by the lifecycle manager, the message processor and the
//! rerender scheduler; none of them is held locked across a suspension point.
//!

use crate::{
    ActorConfig, ActorId, AgentKey, ContainerId,
    behavior::{BehaviorEngine, MachineHandle},
};

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

/// Render pipeline state.
///
/// Actors without a rendering surface stay in `Ready` and never render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    /// Surface being attached, first render pending.
    Initializing,
    /// A render pass is in flight.
    Rendering,
    Ready,
    /// Context changed since the last render.
    Updating,
}

/// Container and agent an actor is registered under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub container: ContainerId,
    pub agent: Option<AgentKey>,
}

/// Teardown callback.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// View of an actor handed to its behaviour engine.
#[derive(Clone)]
pub struct ActorHandle {
    id: ActorId,
    context: Option<String>,
    last_sender: Arc<Mutex<Option<ActorId>>>,
}

impl ActorHandle {
    pub(crate) fn new(id: ActorId, context: Option<String>) -> Self {
        Self {
            id,
            context,
            last_sender: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Resolved context identifier, if the actor has one.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Source of the message currently (or most recently) being dispatched.
    pub fn last_sender(&self) -> Option<ActorId> {
        lock(&self.last_sender).clone()
    }
}

/// A live actor.
pub struct Actor {
    config: ActorConfig,
    mailbox: String,
    behavior: String,
    engine: Arc<dyn BehaviorEngine>,
    machine: Mutex<Option<MachineHandle>>,
    handle: ActorHandle,
    render_state: Mutex<RenderState>,
    surface: AtomicBool,
    rendered: AtomicBool,
    placement: Mutex<Option<Placement>>,
    children: Mutex<BTreeMap<String, ActorId>>,
    unsubscribes: Mutex<Vec<Unsubscribe>>,
    processing: AtomicBool,
}

impl Actor {
    pub(crate) fn new(
        config: ActorConfig,
        mailbox: String,
        behavior: String,
        engine: Arc<dyn BehaviorEngine>,
        machine: MachineHandle,
        handle: ActorHandle,
    ) -> Self {
        Self {
            config,
            mailbox,
            behavior,
            engine,
            machine: Mutex::new(Some(machine)),
            handle,
            render_state: Mutex::new(RenderState::Ready),
            surface: AtomicBool::new(false),
            rendered: AtomicBool::new(false),
            placement: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
            unsubscribes: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.config.id
    }

    pub fn config(&self) -> &ActorConfig {
        &self.config
    }

    /// Resolved mailbox identifier.
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Resolved behaviour definition identifier.
    pub fn behavior(&self) -> &str {
        &self.behavior
    }

    /// Resolved context identifier.
    pub fn context(&self) -> Option<&str> {
        self.handle.context()
    }

    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    pub fn last_sender(&self) -> Option<ActorId> {
        self.handle.last_sender()
    }

    pub fn render_state(&self) -> RenderState {
        *lock(&self.render_state)
    }

    /// True once a rendering surface has been attached.
    pub fn has_surface(&self) -> bool {
        self.surface.load(Ordering::SeqCst)
    }

    /// True once the first render completed.
    pub fn has_rendered(&self) -> bool {
        self.rendered.load(Ordering::SeqCst)
    }

    pub fn placement(&self) -> Option<Placement> {
        lock(&self.placement).clone()
    }

    /// Child actor created for `slot`, if any.
    pub fn child(&self, slot: &str) -> Option<ActorId> {
        lock(&self.children).get(slot).cloned()
    }

    pub fn children(&self) -> Vec<ActorId> {
        lock(&self.children).values().cloned().collect()
    }

    /// True while a drain pass is in flight.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub(crate) fn engine(&self) -> &Arc<dyn BehaviorEngine> {
        &self.engine
    }

    pub(crate) fn machine(&self) -> Option<MachineHandle> {
        *lock(&self.machine)
    }

    pub(crate) fn take_machine(&self) -> Option<MachineHandle> {
        lock(&self.machine).take()
    }

    pub(crate) fn set_render_state(&self, state: RenderState) {
        *lock(&self.render_state) = state;
    }

    /// Moves `Ready` to `Updating`; other states are left alone.
    pub(crate) fn mark_updating(&self) {
        let mut state = lock(&self.render_state);
        if *state == RenderState::Ready {
            *state = RenderState::Updating;
        }
    }

    /// Claims the rendering surface. Returns false if it was already attached.
    pub(crate) fn attach_surface(&self) -> bool {
        !self.surface.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn release_surface(&self) {
        self.surface.store(false, Ordering::SeqCst);
    }

    /// Moves an idle surface that never rendered back to `Initializing`.
    pub(crate) fn restart_initial_render(&self) -> bool {
        let mut state = lock(&self.render_state);
        if *state == RenderState::Ready && !self.has_rendered() {
            *state = RenderState::Initializing;
            return true;
        }
        false
    }

    pub(crate) fn mark_rendered(&self) {
        self.rendered.store(true, Ordering::SeqCst);
    }

    /// Replaces the placement, returning the previous one.
    pub(crate) fn set_placement(
        &self,
        placement: Option<Placement>,
    ) -> Option<Placement> {
        std::mem::replace(&mut *lock(&self.placement), placement)
    }

    pub(crate) fn set_child(&self, slot: &str, child: ActorId) {
        lock(&self.children).insert(slot.to_owned(), child);
    }

    pub(crate) fn record_sender(&self, sender: Option<ActorId>) {
        *lock(&self.handle.last_sender) = sender;
    }

    pub(crate) fn push_unsubscribe(&self, unsubscribe: Unsubscribe) {
        lock(&self.unsubscribes).push(unsubscribe);
    }

    pub(crate) fn take_unsubscribes(&self) -> Vec<Unsubscribe> {
        std::mem::take(&mut *lock(&self.unsubscribes))
    }

    /// Claims the drain guard. Returns false if a pass is already in flight.
    pub(crate) fn begin_processing(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_processing(&self) {
        self.processing.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", self.id())
            .field("mailbox", &self.mailbox)
            .field("render_state", &self.render_state())
            .field("processing", &self.is_processing())
            .finish()
    }
}
