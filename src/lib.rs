//! Core library for the Stage runtime.
//! Re-exports the actor lifecycle and message processing runtime together with the
//! storage contracts it runs on. The SQLite mailbox store is available behind the `sqlite`
//! feature.

pub use actor::{
    ActorConfig, ActorHandle, ActorId, ActorRuntime, ActorSnapshot, AgentKey,
    BehaviorEngine, BehaviorRef, Behaviors, ContainerId, Dispatch, DrainReport,
    Error as ActorError, HeadlessRenderer, MachineHandle, NoStyles, RejectReason,
    RenderRequest, RenderState, Renderer, RuntimeConfig, RuntimeRunner,
    SchemaCheck, SchemaRegistry, SchemaValidator, Services, SpawnOptions,
    StyleEngine, ViewAttachment,
};

pub use store::{
    ChangeCallback, ContextStore, Error as StoreError, MailboxStore, MemoryStore,
    Message, MessageId, Subscription,
};

#[cfg(feature = "sqlite")]
pub use sqlite_db::SqliteMailboxStore;
