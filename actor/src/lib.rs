// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Stage actor runtime
//!
//! A runtime for a population of independent actors. Each actor owns a durable mailbox, a
//! behaviour machine and, optionally, a rendering surface; actors talk to each other only
//! by appending messages to mailboxes.
//!
//! ## Overview
//!
//! - **Lifecycle**: actors are spawned headless or created inside a rendering container,
//!   moved between containers and destroyed. Creation is idempotent per id and destruction
//!   is the only teardown path.
//! - **Delivery**: [`ActorRuntime::deliver_event`] appends a message to the target mailbox.
//!   The store notifies the actor, the notification is debounced and one drain pass runs.
//! - **Processing**: a drain pass validates each message against the actor's declared
//!   interface and the payload schema for its type, dispatches it to the behaviour machine
//!   and marks it processed. Rejected and failing messages are consumed, never retried.
//! - **Rendering**: context changes schedule rerenders. Every request for an actor within
//!   one tick results in one render.
//!
//! ## Scheduling
//!
//! All deferred work goes through one task queue. [`ActorRuntime::tick`] runs a snapshot of
//! the queue; [`RuntimeRunner::run`] ticks whenever work is queued until its cancellation
//! token fires. Guards (registry membership, the per-actor drain flag, render state) are
//! re-checked after every suspension point, so an actor destroyed while work for it is in
//! flight turns that work into a no-op.
//!
//! ## Example
//!
//! ```ignore
//! use actor::{ActorConfig, ActorRuntime, BehaviorRef, Behaviors, HeadlessRenderer,
//!     RuntimeConfig, SchemaRegistry, Services};
//! use store::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = MemoryStore::new();
//! let services = Services::new(
//!     Arc::new(store.clone()),
//!     Arc::new(store),
//!     Behaviors::new(engine),
//!     Arc::new(HeadlessRenderer),
//!     Arc::new(SchemaRegistry::new().with_schema("PING", json!({"type": "object"}))),
//! );
//! let (runtime, mut runner) =
//!     ActorRuntime::create(RuntimeConfig::default(), services, CancellationToken::new());
//! tokio::spawn(async move { runner.run().await });
//!
//! let id = runtime
//!     .spawn_actor(
//!         ActorConfig::new("A1")
//!             .with_behavior(BehaviorRef::Machine("B1".to_owned()))
//!             .with_interface(["PING"]),
//!     )
//!     .await?;
//! runtime.deliver_event(None, &id, "PING", json!({})).await?;
//! ```
//!

mod actor;
mod behavior;
mod config;
mod error;
mod lifecycle;
mod processor;
mod registry;
mod render;
mod rerender;
mod runtime;
mod scheduler;
mod subscriber;
mod validation;

//
// Actors
//

/// A live actor and the view of it handed to behaviour engines.
pub use actor::{Actor, ActorHandle, Placement, RenderState, Unsubscribe};

/// Declarative definitions, identifiers and runtime tuning.
pub use config::{
    ActorConfig, ActorId, AgentKey, BehaviorRef, ContainerId, RuntimeConfig,
    default_inbox,
};

//
// Collaborators
//

/// Behaviour engine contract and the per-kind engine table.
pub use behavior::{BehaviorEngine, Behaviors, Dispatch, MachineHandle};

/// Renderer and style contracts, with no-op implementations.
pub use render::{
    HeadlessRenderer, NoStyles, RenderRequest, Renderer, StyleEngine, ViewAttachment,
};

/// Schema contract, the in-memory schema registry and the validation pipeline.
pub use validation::{
    DB_OP, DB_OP_FIELD, IDEMPOTENCY_KEY, INIT, RejectReason, SchemaCheck,
    SchemaRegistry, SchemaValidator, ValidatedPayload, ValidationPipeline,
};

//
// Components
//

pub use lifecycle::{LifecycleManager, SpawnOptions};

pub use processor::{DrainReport, MessageProcessor};

pub use rerender::RerenderScheduler;

pub use scheduler::{Task, TaskQueue};

pub use subscriber::MailboxSubscriber;

/// Composition root and its runner.
pub use runtime::{ActorRuntime, ActorSnapshot, RuntimeRunner, Services};

/// Error type of the runtime.
pub use error::Error;
