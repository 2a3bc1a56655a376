// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Configuration
//!
//! Identifiers, the declarative actor definition and runtime tuning knobs.
//!

use serde::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    time::Duration,
};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Globally unique actor identifier. Never reused.
    ActorId
}

string_id! {
    /// Rendering container an actor's surface is attached to.
    ContainerId
}

string_id! {
    /// Agent grouping key used to tear down all actors of one agent at once.
    AgentKey
}

/// Mailbox reference derived for actors that do not configure one.
pub fn default_inbox(id: &ActorId) -> String {
    format!("{}/inbox", id)
}

/// Kind of executable behaviour an actor runs.
///
/// Each kind maps to exactly one [`BehaviorEngine`](crate::BehaviorEngine), chosen once when
/// the actor is spawned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "lowercase")]
pub enum BehaviorRef {
    /// Declarative state machine definition.
    Machine(String),
    /// Process (imperative handler) definition.
    Process(String),
}

impl BehaviorRef {
    pub fn reference(&self) -> &str {
        match self {
            BehaviorRef::Machine(reference) | BehaviorRef::Process(reference) => {
                reference
            }
        }
    }
}

/// Declarative actor definition.
///
/// The configuration is an immutable snapshot once the actor is spawned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorConfig {
    pub id: ActorId,
    /// Mailbox reference. Derived from `id` when absent.
    #[serde(default)]
    pub inbox: Option<String>,
    #[serde(default)]
    pub behavior: Option<BehaviorRef>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub view: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    /// Exhaustive set of accepted message types. `None` accepts nothing.
    #[serde(default)]
    pub interface: Option<BTreeSet<String>>,
    /// Child definitions by slot name.
    #[serde(default)]
    pub children: BTreeMap<String, ActorConfig>,
}

impl ActorConfig {
    pub fn new(id: impl Into<ActorId>) -> Self {
        Self {
            id: id.into(),
            inbox: None,
            behavior: None,
            context: None,
            view: None,
            style: None,
            interface: None,
            children: BTreeMap::new(),
        }
    }

    pub fn with_inbox(mut self, inbox: &str) -> Self {
        self.inbox = Some(inbox.to_owned());
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorRef) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_owned());
        self
    }

    pub fn with_view(mut self, view: &str) -> Self {
        self.view = Some(view.to_owned());
        self
    }

    pub fn with_style(mut self, style: &str) -> Self {
        self.style = Some(style.to_owned());
        self
    }

    pub fn with_interface<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interface = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_child(mut self, slot: &str, child: ActorConfig) -> Self {
        self.children.insert(slot.to_owned(), child);
        self
    }

    /// Configured inbox reference, or the conventional one.
    pub fn inbox_ref(&self) -> String {
        self.inbox.clone().unwrap_or_else(|| default_inbox(&self.id))
    }
}

/// Runtime tuning.
///
/// Neither value is a correctness constant: processing is correct for any debounce window,
/// including zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Window used to coalesce bursts of mailbox notifications into one drain pass.
    pub debounce: Duration,
    /// Delay before a retry pass is requeued. Zero requeues for the next tick.
    pub retry_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            retry_delay: Duration::ZERO,
        }
    }
}

impl RuntimeConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}
