// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Behaviour engines
//!
//! The runtime does not interpret behaviour definitions. It drives them through the
//! [`BehaviorEngine`] contract: create one machine per actor, send validated messages to it
//! and destroy it on teardown.
//!

use crate::{ActorId, BehaviorRef, Error, actor::ActorHandle};

use async_trait::async_trait;
use serde_json::Value;

use std::sync::Arc;

/// Opaque machine handle returned by an engine. Owned exclusively by one actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineHandle(pub u64);

/// Outcome of dispatching a message to a machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A transition occurred.
    Handled,
    /// No transition matched, usually because a guard failed in the current state.
    Unhandled,
}

/// Behaviour interpreter contract.
#[async_trait]
pub trait BehaviorEngine: Send + Sync + 'static {
    /// Builds a machine for `definition` (a resolved behaviour identifier).
    async fn create_machine(
        &self,
        definition: &str,
        actor: ActorHandle,
    ) -> Result<MachineHandle, Error>;

    /// Dispatches a validated message.
    async fn send(
        &self,
        machine: MachineHandle,
        kind: &str,
        payload: Value,
    ) -> Result<Dispatch, Error>;

    async fn destroy_machine(&self, machine: MachineHandle) -> Result<(), Error>;
}

/// Engines by behaviour kind.
#[derive(Clone)]
pub struct Behaviors {
    machine: Arc<dyn BehaviorEngine>,
    process: Option<Arc<dyn BehaviorEngine>>,
}

impl Behaviors {
    /// Registry with a state machine engine only.
    pub fn new(machine: Arc<dyn BehaviorEngine>) -> Self {
        Self {
            machine,
            process: None,
        }
    }

    pub fn with_process(mut self, process: Arc<dyn BehaviorEngine>) -> Self {
        self.process = Some(process);
        self
    }

    /// Engine that runs `behavior`.
    ///
    /// # Errors
    ///
    /// `Error::Config` if no engine is registered for the behaviour kind.
    pub fn engine(
        &self,
        actor: &ActorId,
        behavior: &BehaviorRef,
    ) -> Result<Arc<dyn BehaviorEngine>, Error> {
        match behavior {
            BehaviorRef::Machine(_) => Ok(self.machine.clone()),
            BehaviorRef::Process(_) => self.process.clone().ok_or_else(|| {
                Error::Config(
                    actor.clone(),
                    "no engine registered for process behaviors".to_owned(),
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullEngine;

    #[async_trait]
    impl BehaviorEngine for NullEngine {
        async fn create_machine(
            &self,
            _definition: &str,
            _actor: ActorHandle,
        ) -> Result<MachineHandle, Error> {
            Ok(MachineHandle(0))
        }

        async fn send(
            &self,
            _machine: MachineHandle,
            _kind: &str,
            _payload: Value,
        ) -> Result<Dispatch, Error> {
            Ok(Dispatch::Unhandled)
        }

        async fn destroy_machine(
            &self,
            _machine: MachineHandle,
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_engine_by_kind() {
        let id = ActorId::from("A1");
        let behaviors = Behaviors::new(Arc::new(NullEngine));
        assert!(
            behaviors
                .engine(&id, &BehaviorRef::Machine("B1".to_owned()))
                .is_ok()
        );
        assert!(matches!(
            behaviors.engine(&id, &BehaviorRef::Process("P1".to_owned())),
            Err(Error::Config(_, _))
        ));

        let behaviors = behaviors.with_process(Arc::new(NullEngine));
        assert!(
            behaviors
                .engine(&id, &BehaviorRef::Process("P1".to_owned()))
                .is_ok()
        );
    }
}
