// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Shared fakes for the runtime integration tests.

#![allow(dead_code)]

use actor::{
    ActorConfig, ActorHandle, ActorId, ActorRuntime, BehaviorEngine, BehaviorRef,
    Behaviors, Dispatch, Error, MachineHandle, RenderRequest, Renderer, RuntimeConfig,
    SchemaRegistry, Services, ViewAttachment,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use store::{ChangeCallback, MailboxStore, MemoryStore, Message, MessageId, Subscription};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

/// A recorded `send` call.
#[derive(Clone, Debug, PartialEq)]
pub struct Sent {
    pub actor: ActorId,
    pub definition: String,
    pub kind: String,
    pub payload: Value,
    pub handled: bool,
}

struct Machine {
    actor: ActorId,
    definition: String,
    unlocked: HashSet<String>,
}

struct Injection {
    trigger: String,
    store: Arc<dyn MailboxStore>,
    mailbox: String,
    message: Message,
}

/// Behaviour engine driven by a script of guards, failures and injected messages.
#[derive(Default)]
pub struct ScriptedEngine {
    next: AtomicU64,
    machines: Mutex<HashMap<MachineHandle, Machine>>,
    sends: Mutex<Vec<Sent>>,
    destroyed: Mutex<Vec<MachineHandle>>,
    guards: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    injections: Mutex<Vec<Injection>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    /// `kind` is unhandled by a machine until it has handled `unlocked_by`.
    pub fn guard(&self, kind: &str, unlocked_by: &str) {
        self.guards
            .lock()
            .unwrap()
            .insert(kind.to_owned(), unlocked_by.to_owned());
    }

    /// `send` fails for `kind`.
    pub fn fail_on(&self, kind: &str) {
        self.failing.lock().unwrap().insert(kind.to_owned());
    }

    /// Pushes `message` into `mailbox` while handling the first `trigger`.
    pub fn inject_on(
        &self,
        trigger: &str,
        store: Arc<dyn MailboxStore>,
        mailbox: &str,
        message: Message,
    ) {
        self.injections.lock().unwrap().push(Injection {
            trigger: trigger.to_owned(),
            store,
            mailbox: mailbox.to_owned(),
            message,
        });
    }

    /// `send` for `kind` waits on the returned notify.
    pub fn hold_on(&self, kind: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(kind.to_owned(), notify.clone());
        notify
    }

    pub fn sends(&self) -> Vec<Sent> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sends_for(&self, actor: &str) -> Vec<Sent> {
        self.sends()
            .into_iter()
            .filter(|sent| sent.actor.as_str() == actor)
            .collect()
    }

    pub fn kinds_for(&self, actor: &str) -> Vec<String> {
        self.sends_for(actor)
            .into_iter()
            .map(|sent| sent.kind)
            .collect()
    }

    pub fn created(&self) -> usize {
        self.next.load(Ordering::SeqCst) as usize
    }

    pub fn live_machines(&self) -> usize {
        self.machines.lock().unwrap().len()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.lock().unwrap().len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn dispatch(
        &self,
        machine: MachineHandle,
        kind: &str,
        payload: Value,
    ) -> Result<Dispatch, Error> {
        let mut machines = self.machines.lock().unwrap();
        let Some(state) = machines.get_mut(&machine) else {
            return Err(Error::Behavior(format!("unknown machine {:?}", machine)));
        };
        let failing = self.failing.lock().unwrap().contains(kind);
        let guards = self.guards.lock().unwrap().clone();
        let blocked = guards
            .get(kind)
            .is_some_and(|_| !state.unlocked.contains(kind));
        let handled = !failing && !blocked;
        if handled {
            for (locked, unlocked_by) in &guards {
                if unlocked_by == kind {
                    state.unlocked.insert(locked.clone());
                }
            }
        }
        self.sends.lock().unwrap().push(Sent {
            actor: state.actor.clone(),
            definition: state.definition.clone(),
            kind: kind.to_owned(),
            payload,
            handled,
        });

        if failing {
            Err(Error::Behavior(format!("{} failed", kind)))
        } else if blocked {
            Ok(Dispatch::Unhandled)
        } else {
            Ok(Dispatch::Handled)
        }
    }
}

#[async_trait]
impl BehaviorEngine for ScriptedEngine {
    async fn create_machine(
        &self,
        definition: &str,
        actor: ActorHandle,
    ) -> Result<MachineHandle, Error> {
        let handle = MachineHandle(self.next.fetch_add(1, Ordering::SeqCst));
        self.machines.lock().unwrap().insert(
            handle,
            Machine {
                actor: actor.id().clone(),
                definition: definition.to_owned(),
                unlocked: HashSet::new(),
            },
        );
        Ok(handle)
    }

    async fn send(
        &self,
        machine: MachineHandle,
        kind: &str,
        payload: Value,
    ) -> Result<Dispatch, Error> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let hold = self.holds.lock().unwrap().get(kind).cloned();
        if let Some(hold) = hold {
            hold.notified().await;
        }

        let result = self.dispatch(machine, kind, payload);

        let injection = {
            let mut injections = self.injections.lock().unwrap();
            let index = injections
                .iter()
                .position(|injection| injection.trigger == kind);
            index.map(|index| injections.remove(index))
        };
        if let Some(injection) = injection {
            injection
                .store
                .push(&injection.mailbox, injection.message)
                .await
                .unwrap();
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn destroy_machine(&self, machine: MachineHandle) -> Result<(), Error> {
        self.machines.lock().unwrap().remove(&machine);
        self.destroyed.lock().unwrap().push(machine);
        Ok(())
    }
}

/// Renderer that records every call.
#[derive(Default)]
pub struct RecordingRenderer {
    attachments: Mutex<Vec<ViewAttachment>>,
    renders: Mutex<Vec<RenderRequest>>,
    cleanups: Mutex<Vec<ActorId>>,
    fail_attach: AtomicBool,
    fail_render: AtomicBool,
}

impl RecordingRenderer {
    /// The next `attach_view` fails without recording.
    pub fn fail_next_attach(&self) {
        self.fail_attach.store(true, Ordering::SeqCst);
    }

    /// The next `render` fails without recording.
    pub fn fail_next_render(&self) {
        self.fail_render.store(true, Ordering::SeqCst);
    }

    pub fn attachments_for(&self, actor: &str) -> Vec<ViewAttachment> {
        self.attachments
            .lock()
            .unwrap()
            .iter()
            .filter(|attachment| attachment.actor.as_str() == actor)
            .cloned()
            .collect()
    }

    pub fn renders_for(&self, actor: &str) -> Vec<RenderRequest> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.actor.as_str() == actor)
            .cloned()
            .collect()
    }

    pub fn render_count(&self, actor: &str) -> usize {
        self.renders_for(actor).len()
    }

    pub fn cleanup_count(&self, actor: &str) -> usize {
        self.cleanups
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == actor)
            .count()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn attach_view(&self, attachment: ViewAttachment) -> Result<(), Error> {
        if self.fail_attach.swap(false, Ordering::SeqCst) {
            return Err(Error::Render("surface unavailable".to_owned()));
        }
        self.attachments.lock().unwrap().push(attachment);
        Ok(())
    }

    async fn render(&self, request: RenderRequest) -> Result<(), Error> {
        tokio::task::yield_now().await;
        if self.fail_render.swap(false, Ordering::SeqCst) {
            return Err(Error::Render("render failed".to_owned()));
        }
        self.renders.lock().unwrap().push(request);
        Ok(())
    }

    async fn cleanup_actor(&self, actor: &ActorId) -> Result<(), Error> {
        self.cleanups.lock().unwrap().push(actor.clone());
        Ok(())
    }
}

/// Mailbox store that can never mark a message processed.
pub struct UnmarkableStore(pub MemoryStore);

#[async_trait]
impl MailboxStore for UnmarkableStore {
    async fn push(
        &self,
        mailbox: &str,
        message: Message,
    ) -> Result<MessageId, store::Error> {
        self.0.push(mailbox, message).await
    }

    async fn drain_unprocessed(
        &self,
        actor: &str,
        mailbox: &str,
    ) -> Result<Vec<Message>, store::Error> {
        self.0.drain_unprocessed(actor, mailbox).await
    }

    async fn mark_processed(&self, _id: &MessageId) -> Result<(), store::Error> {
        Err(store::Error::Store("read-only mailbox".to_owned()))
    }

    fn subscribe(
        &self,
        mailbox: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, store::Error> {
        self.0.subscribe(mailbox, on_change)
    }

    async fn resolve(&self, reference: &str) -> Result<String, store::Error> {
        self.0.resolve(reference).await
    }

    fn register_alias(&self, symbol: &str, concrete: &str) -> Result<(), store::Error> {
        self.0.register_alias(symbol, concrete)
    }

    async fn messages(&self, mailbox: &str) -> Result<Vec<Message>, store::Error> {
        self.0.messages(mailbox).await
    }
}

pub struct Harness {
    pub runtime: ActorRuntime,
    pub store: MemoryStore,
    pub engine: Arc<ScriptedEngine>,
    pub renderer: Arc<RecordingRenderer>,
    pub token: CancellationToken,
}

impl Harness {
    /// Unprocessed messages of `mailbox`.
    pub async fn pending(&self, mailbox: &str) -> Vec<Message> {
        self.store
            .messages(mailbox)
            .await
            .unwrap()
            .into_iter()
            .filter(|message| !message.processed)
            .collect()
    }

    /// Appends messages straight to the store, bypassing the runtime.
    pub async fn push_raw(&self, mailbox: &str, target: &str, kinds: &[&str]) {
        for kind in kinds {
            self.store
                .push(mailbox, Message::new(kind, json!({}), None, target))
                .await
                .unwrap();
        }
    }

    pub async fn deliver(&self, target: &str, kind: &str, payload: Value) {
        self.runtime
            .deliver_event(None, &ActorId::from(target), kind, payload)
            .await
            .unwrap();
    }
}

/// Runtime over a memory store, with no debounce window.
pub fn harness(schemas: SchemaRegistry) -> Harness {
    harness_with(RuntimeConfig::default().with_debounce(Default::default()), schemas)
}

pub fn harness_with(config: RuntimeConfig, schemas: SchemaRegistry) -> Harness {
    let store = MemoryStore::new();
    harness_on(config, schemas, store.clone(), Arc::new(store))
}

/// Runtime reading mailboxes through `mailboxes`, backed by `store`.
pub fn harness_on(
    config: RuntimeConfig,
    schemas: SchemaRegistry,
    store: MemoryStore,
    mailboxes: Arc<dyn MailboxStore>,
) -> Harness {
    let engine = Arc::new(ScriptedEngine::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let token = CancellationToken::new();
    let services = Services::new(
        mailboxes,
        Arc::new(store.clone()),
        Behaviors::new(engine.clone()),
        renderer.clone(),
        Arc::new(schemas),
    );
    let (runtime, _runner) = ActorRuntime::create(config, services, token.clone());
    Harness {
        runtime,
        store,
        engine,
        renderer,
        token,
    }
}

/// Registry accepting any payload for each of `kinds`.
pub fn open_schemas(kinds: &[&str]) -> SchemaRegistry {
    kinds
        .iter()
        .fold(SchemaRegistry::new(), |registry, kind| {
            registry.with_schema(kind, json!({}))
        })
}

/// Headless machine actor accepting `interface`.
pub fn machine_actor(id: &str, interface: &[&str]) -> ActorConfig {
    ActorConfig::new(id)
        .with_behavior(BehaviorRef::Machine("B1".to_owned()))
        .with_interface(interface.iter().copied())
}

/// View actor accepting `interface`.
pub fn view_actor(id: &str, interface: &[&str]) -> ActorConfig {
    machine_actor(id, interface).with_view("V1")
}
